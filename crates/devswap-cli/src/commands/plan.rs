//! Plan command
//!
//! Runs the persistence planner against a pod spec file and prints the
//! mutated spec. No cluster is contacted.

use std::path::{Path, PathBuf};

use clap::Args;
use k8s_openapi::api::core::v1::PodSpec;

use devswap_common::ReplaceRequest;

use crate::{Error, Result};

/// Flags for the offline plan command
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Replace request file (YAML or JSON)
    #[arg(short = 'f', long = "file")]
    pub file: PathBuf,

    /// Pod spec to plan against (YAML or JSON)
    #[arg(long)]
    pub pod_spec: PathBuf,

    /// Workload name used for the default claim name (defaults to the target name)
    #[arg(long)]
    pub workload: Option<String>,
}

/// Plan against a pod spec file and print the result as YAML
pub fn run(args: PlanArgs) -> Result<()> {
    let request = ReplaceRequest::load(&args.file)?;
    let spec = read_pod_spec(&args.pod_spec)?;
    print!("{}", render(&request, args.workload.as_deref(), spec)?);
    Ok(())
}

fn read_pod_spec(path: &Path) -> Result<PodSpec> {
    let data = std::fs::read_to_string(path).map_err(|e| Error::read_file(path, e))?;
    Ok(serde_yaml::from_str(&data)?)
}

fn render(request: &ReplaceRequest, workload: Option<&str>, spec: PodSpec) -> Result<String> {
    let workload = workload
        .or(request.target.name.as_deref())
        .ok_or_else(|| {
            devswap_common::Error::configuration_at(
                "workload",
                "--workload is required when the target is a label selector",
            )
        })?;
    let planned = devswap_persist::plan(request, workload, spec)?;
    Ok(serde_yaml::to_string(&planned)?)
}
