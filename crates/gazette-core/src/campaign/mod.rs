//! Campaign delivery - lifecycle, rendering, pacing and the batch sender

mod manager;
mod rate_limiter;
mod template;
mod transport;
mod worker;

pub use manager::{CampaignError, CampaignManager};
pub use rate_limiter::{RatePolicy, SendPacer};
pub use template::{RenderedMessage, TemplateRenderer};
pub use transport::{
    build_message, LogTransport, MailTransport, OutgoingMessage, SmtpMailTransport,
    TransportError,
};
pub use worker::{BatchSender, DrainOutcome};
