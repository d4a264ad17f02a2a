pub mod osc;
pub mod translate;

pub use osc::ChatboxClient;
pub use translate::Translator;
