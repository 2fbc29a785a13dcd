pub mod organize_pipeline;
