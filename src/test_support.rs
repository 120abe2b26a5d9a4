//! In-memory broker channel and log capture for unit tests.

use crate::broker::{BrokerChannel, DeliveryStream, ExchangeKind};
use crate::delivery::Delivery;
use crate::error::BrokerError;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A channel operation as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    ExchangeDeclare { exchange: String, kind: ExchangeKind, durable: bool },
    QueueDeclare { queue: String, durable: bool },
    QueueBind { queue: String, exchange: String, routing_key: String },
    Qos(u16),
    Consume { queue: String, consumer_tag: String },
    Cancel(String),
    Ack(u64),
    Nack { delivery_tag: u64, requeue: bool },
    Publish { exchange: String, routing_key: String, payload: Vec<u8>, headers: BTreeMap<String, String> },
    Close,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub op: Op,
    pub thread: ThreadId,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    queues: HashMap<String, mpsc::UnboundedSender<Result<Delivery, BrokerError>>>,
    active_tags: HashSet<String>,
    rejected_consumes: usize,
}

/// Shared view of the fake broker: tests push deliveries and inspect calls.
#[derive(Clone, Default)]
pub(crate) struct MockBroker {
    state: Arc<Mutex<State>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> MockChannel {
        MockChannel { state: self.state.clone() }
    }

    /// The next `count` consumer registrations fail with a tag collision.
    pub fn reject_next_consumes(&self, count: usize) {
        self.state.lock().unwrap().rejected_consumes = count;
    }

    pub fn deliver(&self, queue: &str, delivery_tag: u64, payload: &str) {
        self.deliver_with_headers(queue, delivery_tag, payload, BTreeMap::new());
    }

    pub fn deliver_with_headers(
        &self,
        queue: &str,
        delivery_tag: u64,
        payload: &str,
        headers: BTreeMap<String, String>,
    ) {
        let delivery = Delivery {
            delivery_tag,
            queue: queue.to_string(),
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            timestamp: None,
            headers,
            payload: payload.as_bytes().to_vec(),
        };
        self.send(queue, Ok(delivery));
    }

    /// Fails the stream of `queue` as if the connection dropped.
    pub fn drop_connection(&self, queue: &str) {
        self.send(queue, Err(BrokerError::ConnectionLost("socket closed".to_string())));
    }

    fn send(&self, queue: &str, item: Result<Delivery, BrokerError>) {
        let state = self.state.lock().unwrap();
        let sender = state
            .queues
            .get(queue)
            .unwrap_or_else(|| panic!("no consumer registered on {queue}"));
        sender.send(item).unwrap();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    /// Ack and nack calls, in the order the broker saw them.
    pub fn settlements(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c.op, Op::Ack(_) | Op::Nack { .. }))
            .collect()
    }

    /// Polls until `count` acks/nacks arrived or `timeout` passed.
    pub fn wait_for_settlements(&self, count: usize, timeout: Duration) -> Vec<Call> {
        let deadline = Instant::now() + timeout;
        loop {
            let settled = self.settlements();
            if settled.len() >= count || Instant::now() >= deadline {
                return settled;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

pub(crate) struct MockChannel {
    state: Arc<Mutex<State>>,
}

impl MockChannel {
    fn record(&self, op: Op) {
        self.state.lock().unwrap().calls.push(Call {
            op,
            thread: thread::current().id(),
        });
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn exchange_declare(&self, exchange: &str, kind: ExchangeKind, durable: bool) -> Result<(), BrokerError> {
        self.record(Op::ExchangeDeclare { exchange: exchange.to_string(), kind, durable });
        Ok(())
    }

    async fn queue_declare(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.record(Op::QueueDeclare { queue: queue.to_string(), durable });
        Ok(())
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.record(Op::QueueBind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.record(Op::Qos(prefetch_count));
        Ok(())
    }

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        self.record(Op::Consume { queue: queue.to_string(), consumer_tag: consumer_tag.to_string() });
        let mut state = self.state.lock().unwrap();
        if state.rejected_consumes > 0 || state.active_tags.contains(consumer_tag) {
            state.rejected_consumes = state.rejected_consumes.saturating_sub(1);
            return Err(BrokerError::ConsumerTagInUse(consumer_tag.to_string()));
        }
        state.active_tags.insert(consumer_tag.to_string());

        let (tx, mut rx) = mpsc::unbounded_channel();
        state.queues.insert(queue.to_string(), tx);
        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.record(Op::Cancel(consumer_tag.to_string()));
        self.state.lock().unwrap().active_tags.remove(consumer_tag);
        Ok(())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.record(Op::Ack(delivery_tag));
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.record(Op::Nack { delivery_tag, requeue });
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<(), BrokerError> {
        self.record(Op::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
            headers: headers.clone(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.record(Op::Close);
        Ok(())
    }
}

struct CapturingLogger {
    records: Mutex<Vec<(log::Level, String)>>,
}

impl log::Log for CapturingLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger { records: Mutex::new(Vec::new()) };

/// Installs the capturing logger for this test binary. Idempotent.
pub(crate) fn capture_logs() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}

/// Captured messages at `level` containing `needle`.
pub(crate) fn logged(level: log::Level, needle: &str) -> Vec<String> {
    LOGGER
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(l, msg)| *l == level && msg.contains(needle))
        .map(|(_, msg)| msg.clone())
        .collect()
}

/// A request seen by [`HttpStub`].
#[derive(Debug, Clone)]
pub(crate) struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Minimal HTTP/1.1 server answering each request with the next scripted
/// status; the last status repeats once the script runs out.
pub(crate) struct HttpStub {
    addr: std::net::SocketAddr,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl HttpStub {
    pub fn start(statuses: Vec<u16>) -> Self {
        use std::io::{BufRead, BufReader, Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        thread::spawn(move || {
            for (i, stream) in listener.incoming().enumerate() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let mut headers = Vec::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        break;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((key, value)) = line.split_once(':') {
                        headers.push((key.trim().to_string(), value.trim().to_string()));
                    }
                }

                let length = headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.parse::<usize>().ok())
                    .unwrap_or(0);
                let mut body = vec![0; length];
                let _ = reader.read_exact(&mut body);

                seen.lock().unwrap().push(ReceivedRequest {
                    method,
                    path,
                    headers,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });

                let status = statuses.get(i).or(statuses.last()).copied().unwrap_or(200);
                let reply = format!(
                    "HTTP/1.1 {status} Stub\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                );
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.flush();
            }
        });

        Self { addr, requests }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.requests.lock().unwrap().clone()
    }
}
