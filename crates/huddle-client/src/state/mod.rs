pub mod roster;
pub mod settings;

pub use roster::Roster;
pub use settings::ClientSettings;
