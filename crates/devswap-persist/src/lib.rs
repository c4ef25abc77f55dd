//! Persistence planner for devswap
//!
//! Redirects designated container paths onto a single persistent volume and
//! injects one init container per path that copies the image contents into
//! the volume exactly once:
//! - one `devspace-persistence` volume backed by the workload's claim
//! - one volume mount per (container, persist path)
//! - one `path-{i}-init` container per path that needs population
//!
//! Planning is a pure, synchronous transform over an owned `PodSpec`.

#![deny(missing_docs)]

mod plan;
mod population;

pub use plan::{plan, PersistencePlan, VolumeMountPlan};
pub use population::{clean_path, PopulationInitContainer};
