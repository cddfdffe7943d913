pub mod error;
pub mod generator;
pub mod outbound;
pub mod pipeline;
pub mod protocols;

pub use error::CompileError;
pub use generator::{ConfigGenerator, SELECTOR_TAG, URLTEST_TAG};
pub use outbound::Compiled;

/// Built-in base document, used unless a template path is configured.
pub const BASE_TEMPLATE: &str = include_str!("../../templates/base_singbox.json");
