pub mod aggregate;
pub mod config;
pub mod derive;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod report;
pub mod smooth;
pub mod states;
pub mod types;
