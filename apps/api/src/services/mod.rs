//! Outbound integrations: payment provider and mail, plus the invoice
//! delivery rules that use them.

pub mod delivery;
pub mod mailer;
pub mod payment_provider;

pub use mailer::{Email, HttpMailer, LogMailer, MailError, Mailer};
pub use payment_provider::{Checkout, CheckoutRequest, PaymentProvider, ProviderError, YocoClient};
