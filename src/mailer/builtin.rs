use super::{Mailer, MailerError, MailerResult};
use crate::message::OutboundMessage;
use crate::transport::{Transport, TransportTrace};
use async_trait::async_trait;

/// Mailer wrapping one of the builtin transports
///
/// Resolved through [`Connection::mailer`](crate::connection::Connection::mailer)
/// when the `mailers` command reports whether the selected mailer is complete.
pub struct BuiltinMailer {
    slug: &'static str,
    transport: Box<dyn Transport>,
    complete: bool,
    sent: bool,
    error: Option<String>,
    trace: TransportTrace,
}

impl BuiltinMailer {
    pub fn new(slug: &'static str, transport: Box<dyn Transport>, complete: bool) -> Self {
        Self {
            slug,
            transport,
            complete,
            sent: false,
            error: None,
            trace: TransportTrace::new(true),
        }
    }

    async fn deliver(&mut self, message: &OutboundMessage) -> MailerResult<()> {
        let email = message.to_lettre_message(message.sender_domain().unwrap_or("localhost"))?;
        self.transport.deliver(&email, &mut self.trace).await?;
        Ok(())
    }
}

#[async_trait]
impl Mailer for BuiltinMailer {
    async fn send(&mut self, message: &OutboundMessage) -> MailerResult<()> {
        self.sent = false;
        self.error = None;

        if !self.complete {
            let error = MailerError::Incomplete(self.slug.to_string());
            self.error = Some(error.to_string());
            return Err(error);
        }

        match self.deliver(message).await {
            Ok(()) => {
                self.sent = true;
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn is_email_sent(&self) -> bool {
        self.sent
    }

    fn is_mailer_complete(&self) -> bool {
        self.complete
    }

    fn response_error(&self) -> Option<String> {
        self.error.clone()
    }

    fn debug_info(&self) -> String {
        let mut info = format!("Mailer: {}\r\nTransport: {}", self.slug, self.transport.name());
        if !self.trace.is_empty() {
            info.push_str("\r\n");
            info.push_str(&self.trace.render());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportResult};
    use lettre::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTransport {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, _message: &Message, trace: &mut TransportTrace) -> TransportResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            trace.record("250 queued");
            if self.fail {
                Err(TransportError::Rejected("550 no".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage::new()
            .from_str("site@example.com")
            .unwrap()
            .to_str("user@example.org")
            .unwrap()
            .subject("Hi")
            .text("Body")
    }

    #[tokio::test]
    async fn test_send_success_and_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mailer = BuiltinMailer::new(
            "smtp",
            Box::new(CountingTransport {
                calls: calls.clone(),
                fail: false,
            }),
            true,
        );
        mailer.send(&message()).await.unwrap();
        assert!(mailer.is_email_sent());
        assert!(mailer.debug_info().contains("250 queued"));

        let mut failing = BuiltinMailer::new(
            "smtp",
            Box::new(CountingTransport {
                calls: calls.clone(),
                fail: true,
            }),
            true,
        );
        assert!(failing.send(&message()).await.is_err());
        assert!(!failing.is_email_sent());
        assert!(failing.response_error().unwrap().contains("550"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_incomplete_mailer_never_delivers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mailer = BuiltinMailer::new(
            "smtp",
            Box::new(CountingTransport {
                calls: calls.clone(),
                fail: false,
            }),
            false,
        );

        assert!(matches!(
            mailer.send(&message()).await,
            Err(MailerError::Incomplete(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
