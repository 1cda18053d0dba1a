//! Subcommand implementations.

pub mod determinism;
pub mod fit;
pub mod hip_ab;
pub mod measure;
pub mod sweep;

use anyhow::{Context, Result};
use beta_fit::MeshProvider;

use crate::ProviderArgs;

/// Build the provider selected on the command line.
pub fn build_provider(args: &ProviderArgs) -> Result<Box<dyn MeshProvider>> {
    args.mesh_provider
        .build(args.seed, args.base_verts.as_deref())
        .with_context(|| format!("Failed to set up mesh provider '{}'", args.mesh_provider))
}
