use {
    crate::rpc,
    sha2::{Digest, Sha256},
    std::sync::Arc,
};

/// Stable digest identifying a published message. The relay may redeliver a
/// message after a reconnect, so clients key their de-duplication caches on
/// this digest rather than on the (fresh) request ID.
pub trait MsgId {
    fn msg_id(&self) -> Arc<str>;
}

fn message_digest(message: &str) -> Arc<str> {
    let msg_id = Sha256::new().chain_update(message.as_bytes()).finalize();
    format!("{msg_id:x}").into()
}

impl MsgId for rpc::Publish {
    fn msg_id(&self) -> Arc<str> {
        message_digest(self.message.as_ref())
    }
}

impl MsgId for rpc::Subscription {
    fn msg_id(&self) -> Arc<str> {
        message_digest(self.data.message.as_ref())
    }
}
