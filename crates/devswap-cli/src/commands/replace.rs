//! Replace command

use super::{cancel_on_ctrl_c, controller, ClusterArgs};
use crate::Result;

/// Replace the workload and print the replacement
pub async fn run(args: ClusterArgs) -> Result<()> {
    let mut ctrl = controller(&args).await?;
    let namespace = ctrl.namespace().to_string();
    let cancel = cancel_on_ctrl_c();

    // an existing replacement is adopted or updated in place
    let record = ctrl.replace(&cancel).await?;

    println!(
        "{} {}/{} replaced by Deployment {}",
        record.parent_kind, namespace, record.parent_name, record.replacement_name
    );
    Ok(())
}
