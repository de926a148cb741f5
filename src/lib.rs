pub mod ink;
pub mod logging;
pub mod settings;

pub use settings::InkSettings;
