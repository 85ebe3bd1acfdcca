use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{reply, PalaceTools};
use crate::error::ToolError;

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RescanParams {
    #[schemars(description = "Workspace-relative file or directory. The whole workspace when omitted.")]
    pub path: Option<String>,
}

impl PalaceTools {
    pub(super) async fn rescan(&self, params: RescanParams) -> Result<Value, ToolError> {
        let path = params.path.as_deref().map(str::trim).filter(|p| !p.is_empty());
        tracing::info!(path = path.unwrap_or("."), "rescan requested");
        let report = self.indexer.rescan(path).await?;
        reply(report)
    }
}
