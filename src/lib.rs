mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

pub use cli::run;
pub use commands::organize_pipeline::{
    preview_plan, run_full_pipeline, run_ungroup_all, PipelineCtx, PlanPreview,
};
pub use config::OrganizeConfig;
pub use error::AppError;
pub use services::host::BrowserHost;
pub use state::{AppState, ProgressEvent, ProgressSink};
