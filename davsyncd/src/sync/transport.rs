use async_trait::async_trait;
use davsync_core::{DavClient, DeleteReply, DeleteRequest};
use url::Url;

/// Issues remote deletes. Failures are folded into the reply so callers
/// inspect one shape for both HTTP and transport errors.
#[async_trait]
pub trait DeleteTransport: Send + Sync {
    fn dav_url(&self) -> &Url;

    async fn delete(&self, request: DeleteRequest) -> DeleteReply;
}

#[async_trait]
impl DeleteTransport for DavClient {
    fn dav_url(&self) -> &Url {
        DavClient::dav_url(self)
    }

    async fn delete(&self, request: DeleteRequest) -> DeleteReply {
        match DavClient::delete(self, &request).await {
            Ok(reply) => reply,
            Err(err) => DeleteReply::from_error(&err),
        }
    }
}
