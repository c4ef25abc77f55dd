//! Revert command

use devswap_replace::ReplacePhase;

use super::{cancel_on_ctrl_c, controller, ClusterArgs};
use crate::Result;

/// Revert the workload if it is currently replaced
pub async fn run(args: ClusterArgs) -> Result<()> {
    let mut ctrl = controller(&args).await?;
    let cancel = cancel_on_ctrl_c();

    if ctrl.sync(&cancel).await? != ReplacePhase::Replaced {
        println!("Nothing to revert in namespace {}", ctrl.namespace());
        return Ok(());
    }
    let parent = ctrl
        .record()
        .map(|r| format!("{} {}/{}", r.parent_kind, ctrl.namespace(), r.parent_name))
        .unwrap_or_default();

    ctrl.revert(&cancel).await?;
    println!("{} restored", parent);
    Ok(())
}
