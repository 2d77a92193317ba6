use url::Url;

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Websocket endpoint served next to the REST API (`/ws`).
pub fn ws_url_for(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&normalize_url(base_url))?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    // http(s) -> ws(s) stays within the special schemes, so this cannot fail
    let _ = url.set_scheme(scheme);
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
}

/// Uppercases and validates a support code of the form `CONV-XXXXXX`.
pub fn normalize_conversation_code(input: &str) -> Option<String> {
    let code = input.trim().to_uppercase();
    let suffix = code.strip_prefix("CONV-")?;
    let valid = suffix.len() == 6 && suffix.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(code)
}
