use crate::domain::model::{AdapterKind, AdapterMode, ServiceStatus, Signal};
use async_trait::async_trait;

/// One external capability with a configured path and a local fallback.
///
/// `fetch` never fails: every failure degrades into a labelled signal.
#[async_trait]
pub trait SignalAdapter<I: ?Sized + Sync>: Send + Sync {
    type Output: Send + Sync + 'static;

    fn kind(&self) -> AdapterKind;

    /// 依憑證是否存在決定，建構後不變
    fn mode(&self) -> AdapterMode;

    /// e.g. `serpapi`, `moz`, `heuristic`
    fn backend(&self) -> &'static str;

    async fn fetch(&self, input: &I) -> Signal<Self::Output>;

    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            adapter: self.kind(),
            mode: self.mode(),
            backend: self.backend().to_string(),
        }
    }
}
