//! Status command

use devswap_replace::ReplacementRecord;

use super::{cancel_on_ctrl_c, controller, ClusterArgs};
use crate::Result;

/// Print the phase and recorded parent of the workload
pub async fn run(args: ClusterArgs) -> Result<()> {
    let mut ctrl = controller(&args).await?;
    let cancel = cancel_on_ctrl_c();

    let phase = ctrl.sync(&cancel).await?;
    println!("Namespace:   {}", ctrl.namespace());
    println!("Phase:       {}", phase);
    if let Some(record) = ctrl.record() {
        print!("{}", describe(record));
    }
    Ok(())
}

fn describe(record: &ReplacementRecord) -> String {
    let mut out = format!(
        "Parent:      {} {}\nReplacement: Deployment {}\n",
        record.parent_kind, record.parent_name, record.replacement_name
    );
    if let Some(replicas) = record.replicas {
        out.push_str(&format!("Replicas:    {}\n", replicas));
    }
    out.push_str(&format!("Config hash: {}\n", record.config_hash));
    out
}
