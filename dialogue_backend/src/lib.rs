pub mod classify;
pub mod config;
pub mod event;
pub mod parser;
pub mod recovery;
pub mod session;
pub mod store;
pub mod text;

pub use classify::{ClassifierRegistry, ClassifyContext, MarkerClassifier, TagClassifier};
pub use config::DialogueConfig;
pub use event::{DialogueEvent, GroupMessage, Moment, MomentComment};
pub use parser::{DialogueStreamParser, ParserStats};
pub use session::{drive_stream, ResponseSession, SessionOutcome};
pub use store::{ChatStore, MessageStore};
