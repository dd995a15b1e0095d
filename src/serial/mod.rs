pub mod link;
pub mod parser;

pub use link::{Connector, LinkSettings, LinkState, ReplayConnector, SerialConnector, SerialLink};
pub use parser::{LineProtocol, ReadingParser};
