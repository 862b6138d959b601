use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::model::{Booking, BookingStatus};
use crate::observability;

const QUEUE_CAPACITY: usize = 1024;

/// Why a booking e-mail goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Received,
    StatusChanged { from: BookingStatus, to: BookingStatus },
    Cancelled,
}

impl Notice {
    fn label(&self) -> &'static str {
        match self {
            Notice::Received => "received",
            Notice::StatusChanged { .. } => "status_changed",
            Notice::Cancelled => "cancelled",
        }
    }
}

/// The booking as it was right after the write, plus what an e-mail needs to name the hall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSnapshot {
    pub booking: Booking,
    pub facility_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub notice: Notice,
    pub snapshot: BookingSnapshot,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound booking e-mail. Implementations talk to the mail provider.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify_customer(&self, notice: &Notice, snapshot: &BookingSnapshot) -> Result<(), NotifyError>;

    async fn notify_admin_status_change(
        &self,
        notice: &Notice,
        snapshot: &BookingSnapshot,
    ) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, …
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

// ── Queue ──────────────────────────────────────────────────────────

/// Handle the engine uses to hand off notifications. Never blocks, never fails the caller.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Outbound>,
}

impl NotificationQueue {
    /// Spawn the delivery worker and return its queue.
    pub fn start(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        let (queue, rx) = Self::channel(QUEUE_CAPACITY);
        tokio::spawn(run_delivery(rx, notifier, policy));
        queue
    }

    /// A queue without a worker; the caller drains the receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, outbound: Outbound) {
        let booking_id = outbound.snapshot.booking.id;
        let notice = outbound.notice.label();
        match self.tx.try_send(outbound) {
            Ok(()) => debug!(%booking_id, notice, "notification queued"),
            Err(TrySendError::Full(_)) => {
                warn!(%booking_id, notice, "notification queue full, dropping");
                metrics::counter!(observability::NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%booking_id, notice, "notification worker stopped, dropping");
                metrics::counter!(observability::NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            }
        }
    }
}

// ── Delivery worker ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recipient {
    Customer,
    Admin,
}

impl Recipient {
    fn label(&self) -> &'static str {
        match self {
            Recipient::Customer => "customer",
            Recipient::Admin => "admin",
        }
    }
}

/// Background task: deliver each message to the customer and the admin, with retries.
/// Exits once every queue handle is dropped.
pub async fn run_delivery(
    mut rx: mpsc::Receiver<Outbound>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
) {
    while let Some(msg) = rx.recv().await {
        for recipient in [Recipient::Customer, Recipient::Admin] {
            deliver(notifier.as_ref(), recipient, &msg, &policy).await;
        }
    }
    debug!("notification worker stopped");
}

/// Returns the number of attempts used, or `None` if every attempt failed.
async fn deliver(
    notifier: &dyn Notifier,
    recipient: Recipient,
    msg: &Outbound,
    policy: &RetryPolicy,
) -> Option<u32> {
    let booking_id = msg.snapshot.booking.id;
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let result = match recipient {
            Recipient::Customer => notifier.notify_customer(&msg.notice, &msg.snapshot).await,
            Recipient::Admin => {
                notifier
                    .notify_admin_status_change(&msg.notice, &msg.snapshot)
                    .await
            }
        };
        match result {
            Ok(()) => {
                metrics::counter!(observability::NOTIFICATIONS_SENT_TOTAL, "recipient" => recipient.label())
                    .increment(1);
                return Some(attempt);
            }
            Err(e) if attempt < attempts => {
                let delay = policy.backoff(attempt);
                debug!(%booking_id, recipient = recipient.label(), attempt, ?delay, "notification failed, retrying: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(%booking_id, recipient = recipient.label(), attempts, "notification gave up: {e}");
                metrics::counter!(observability::NOTIFICATIONS_FAILED_TOTAL, "recipient" => recipient.label())
                    .increment(1);
            }
        }
    }
    None
}

// ── E-mail rendering ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn when(booking: &Booking) -> String {
    let fmt = |t| {
        chrono::DateTime::from_timestamp_millis(t)
            .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default()
    };
    format!("{} to {}", fmt(booking.span.start), fmt(booking.span.end))
}

pub fn customer_email(notice: &Notice, snapshot: &BookingSnapshot) -> Email {
    let b = &snapshot.booking;
    let subject = match notice {
        Notice::Received => format!("We received your booking request: {}", b.event_title),
        Notice::StatusChanged { to, .. } => format!("Your booking is now {to}: {}", b.event_title),
        Notice::Cancelled => format!("Your booking was cancelled: {}", b.event_title),
    };
    let mut body = format!(
        "Hello {},\n\nBooking: {}\nFacility: {}\nWhen: {}\nStatus: {}\n",
        b.customer_name,
        b.event_title,
        snapshot.facility_name,
        when(b),
        b.status
    );
    if let Some(cost) = b.total_cost {
        body.push_str(&format!("Estimated cost: {cost} ({} hours)\n", b.total_hours));
    }
    Email {
        to: b.customer_email.clone(),
        subject,
        body,
    }
}

pub fn admin_email(notice: &Notice, snapshot: &BookingSnapshot, to: &str) -> Email {
    let b = &snapshot.booking;
    let subject = match notice {
        Notice::Received => format!("New booking request for {}", snapshot.facility_name),
        Notice::StatusChanged { from, to } => {
            format!("Booking {} changed from {from} to {to}", b.id)
        }
        Notice::Cancelled => format!("Booking {} cancelled", b.id),
    };
    let body = format!(
        "Booking {}\nCustomer: {} <{}>{}\nEvent: {}\nFacility: {}\nWhen: {}\nStatus: {}\n",
        b.id,
        b.customer_name,
        b.customer_email,
        b.customer_phone
            .as_deref()
            .map(|p| format!(", {p}"))
            .unwrap_or_default(),
        b.event_title,
        snapshot.facility_name,
        when(b),
        b.status
    );
    Email {
        to: to.to_string(),
        subject,
        body,
    }
}

/// Renders the e-mails and writes them to the log. Stands in for a mail provider.
pub struct LogNotifier {
    admin_email: String,
}

impl LogNotifier {
    pub fn new(admin_email: impl Into<String>) -> Self {
        Self {
            admin_email: admin_email.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_customer(&self, notice: &Notice, snapshot: &BookingSnapshot) -> Result<(), NotifyError> {
        let email = customer_email(notice, snapshot);
        info!(to = %email.to, subject = %email.subject, body = %email.body, "email");
        Ok(())
    }

    async fn notify_admin_status_change(
        &self,
        notice: &Notice,
        snapshot: &BookingSnapshot,
    ) -> Result<(), NotifyError> {
        let email = admin_email(notice, snapshot, &self.admin_email);
        info!(to = %email.to, subject = %email.subject, body = %email.body, "email");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, Span, price};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn snapshot() -> BookingSnapshot {
        let span = Span::new(1_748_772_000_000, 1_748_772_000_000 + 2 * HOUR_MS);
        let (total_hours, total_cost) = price(&span, Some(Decimal::new(5000, 2)));
        BookingSnapshot {
            booking: Booking {
                id: Ulid::new(),
                facility_id: Ulid::new(),
                customer_name: "Priya".into(),
                customer_email: "priya@example.org".into(),
                customer_phone: Some("555-0100".into()),
                event_title: "Book club".into(),
                event_description: None,
                span,
                total_hours,
                total_cost,
                status: BookingStatus::Pending,
                notes: None,
                created_at: 0,
                updated_at: 0,
            },
            facility_name: "Main Hall".into(),
        }
    }

    /// Fails the first `failures` calls per recipient, then records successes.
    struct FlakyNotifier {
        failures: u32,
        customer_calls: AtomicU32,
        admin_calls: AtomicU32,
        delivered: Mutex<Vec<&'static str>>,
    }

    impl FlakyNotifier {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                customer_calls: AtomicU32::new(0),
                admin_calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }

        fn attempt(&self, counter: &AtomicU32, who: &'static str) -> Result<(), NotifyError> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(NotifyError::Delivery(format!("smtp down ({who})")));
            }
            self.delivered.lock().unwrap().push(who);
            Ok(())
        }
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn notify_customer(&self, _: &Notice, _: &BookingSnapshot) -> Result<(), NotifyError> {
            self.attempt(&self.customer_calls, "customer")
        }

        async fn notify_admin_status_change(&self, _: &Notice, _: &BookingSnapshot) -> Result<(), NotifyError> {
            self.attempt(&self.admin_calls, "admin")
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn retries_until_delivered() {
        let notifier = FlakyNotifier::new(2);
        let msg = Outbound { notice: Notice::Received, snapshot: snapshot() };
        let used = deliver(&notifier, Recipient::Customer, &msg, &fast_policy(3)).await;
        assert_eq!(used, Some(3));
        assert_eq!(notifier.customer_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let notifier = FlakyNotifier::new(10);
        let msg = Outbound { notice: Notice::Cancelled, snapshot: snapshot() };
        let used = deliver(&notifier, Recipient::Admin, &msg, &fast_policy(3)).await;
        assert_eq!(used, None);
        assert_eq!(notifier.admin_calls.load(Ordering::SeqCst), 3);
        assert!(notifier.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_delivers_to_both_recipients() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let (queue, rx) = NotificationQueue::channel(8);
        let worker = tokio::spawn(run_delivery(rx, notifier.clone(), fast_policy(1)));

        queue.enqueue(Outbound { notice: Notice::Received, snapshot: snapshot() });
        drop(queue);
        worker.await.unwrap();

        assert_eq!(*notifier.delivered.lock().unwrap(), vec!["customer", "admin"]);
    }

    #[tokio::test]
    async fn enqueue_on_closed_queue_is_harmless() {
        let (queue, rx) = NotificationQueue::channel(1);
        drop(rx);
        queue.enqueue(Outbound { notice: Notice::Received, snapshot: snapshot() });
    }

    #[tokio::test]
    async fn enqueue_on_full_queue_drops() {
        let (queue, mut rx) = NotificationQueue::channel(1);
        queue.enqueue(Outbound { notice: Notice::Received, snapshot: snapshot() });
        queue.enqueue(Outbound { notice: Notice::Cancelled, snapshot: snapshot() });
        assert_eq!(rx.recv().await.unwrap().notice, Notice::Received);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn customer_email_mentions_cost_and_status() {
        let snap = snapshot();
        let email = customer_email(
            &Notice::StatusChanged { from: BookingStatus::Pending, to: BookingStatus::Confirmed },
            &snap,
        );
        assert_eq!(email.to, "priya@example.org");
        assert_eq!(email.subject, "Your booking is now confirmed: Book club");
        assert!(email.body.contains("Facility: Main Hall"));
        assert!(email.body.contains("Estimated cost: 100.00"));
    }

    #[test]
    fn admin_email_names_transition() {
        let snap = snapshot();
        let email = admin_email(
            &Notice::StatusChanged { from: BookingStatus::Pending, to: BookingStatus::Rejected },
            &snap,
            "office@centre.org",
        );
        assert_eq!(email.to, "office@centre.org");
        assert!(email.subject.ends_with("changed from pending to rejected"));
        assert!(email.body.contains("Priya <priya@example.org>, 555-0100"));
    }
}
