use log::{info, warn};

use crate::api::client::ChatApi;
use crate::api::models::CompletionAction;
use crate::error::{AdminError, ApiError};
use crate::lifecycle::{StatusChange, Transition, next_status};
use crate::session::{ChatSession, SessionUpdate};

/// Moderation commands. Each is one REST call; local state only changes
/// after the call succeeded.
impl<A: ChatApi> ChatSession<A> {
    /// Closes a conversation for good. `confirmed` must carry the user's
    /// explicit yes; without it nothing is sent.
    pub async fn close_conversation(
        &mut self,
        conversation_id: &str,
        confirmed: bool,
    ) -> Result<SessionUpdate, AdminError> {
        if !confirmed {
            return Err(AdminError::NotConfirmed);
        }
        self.check_transition(conversation_id, Transition::Close)?;
        let result = self.api.leave_conversation(conversation_id).await;
        self.checked(result)?;
        info!("closed conversation {conversation_id}");
        let update = self.apply_status(StatusChange::closed(conversation_id, None));
        self.refresh_after_action().await;
        Ok(update)
    }

    pub async fn complete_task(
        &mut self,
        conversation_id: &str,
        action: CompletionAction,
    ) -> Result<SessionUpdate, AdminError> {
        self.check_transition(conversation_id, Transition::Complete(action))?;
        let result = self.api.complete_task(conversation_id, action).await;
        self.checked(result)?;
        info!("task in {conversation_id} completed ({action:?})");
        let update = self.apply_status(StatusChange::completed(conversation_id, action, None));
        self.refresh_after_action().await;
        Ok(update)
    }

    pub async fn approve_task(&mut self, task_id: &str) -> Result<(), AdminError> {
        let result = self.api.approve_task(task_id).await;
        self.checked(result)?;
        info!("approved task {task_id}");
        self.refresh_after_action().await;
        Ok(())
    }

    pub async fn reject_task(&mut self, task_id: &str, reason: Option<&str>) -> Result<(), AdminError> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let result = self.api.reject_task(task_id, reason).await;
        self.checked(result)?;
        info!("rejected task {task_id}");
        self.refresh_after_action().await;
        Ok(())
    }

    pub async fn approve_partner_request(&mut self, request_id: &str) -> Result<(), ApiError> {
        let result = self.api.approve_partner_request(request_id).await;
        self.checked(result)?;
        info!("approved partner request {request_id}");
        Ok(())
    }

    pub async fn reject_partner_request(&mut self, request_id: &str) -> Result<(), ApiError> {
        let result = self.api.reject_partner_request(request_id).await;
        self.checked(result)?;
        info!("rejected partner request {request_id}");
        Ok(())
    }

    /// Refuses transitions the locally known status cannot take. Unknown
    /// conversations are left to the server.
    fn check_transition(&self, conversation_id: &str, transition: Transition) -> Result<(), AdminError> {
        if let Some(conv) = self.store.conversation(conversation_id) {
            next_status(conv.status, transition)?;
        }
        Ok(())
    }

    // The action already went through; a failed refresh only leaves the
    // list stale until the next one.
    async fn refresh_after_action(&mut self) {
        if let Err(e) = self.refresh_conversations().await {
            warn!("refresh after admin action failed: {e}");
        }
    }
}
