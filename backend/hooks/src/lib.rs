pub mod pipeline;
pub mod registry;

pub use pipeline::{HookPipeline, run_stage};
pub use registry::{
    BoundHook, HookRegistry, RegistryBuild, RegistryWarning, ResolvedAttachment,
    build_registry, collect_attachments,
};
