use async_trait::async_trait;
use rabbitmq_relay::{
    CallbackResult, Consumer, ConsumerConfig, Delivery, JsonHandler, LogTracer, MessageHandler,
    StopHandle, WorkerError,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// 1. Define your message struct
#[derive(Deserialize, Debug, Clone)]
struct OrderMessage {
    content: String,
    id: u32,
}

// 2. Implement the `MessageHandler` trait for your logic
struct OrderHandler;

#[async_trait]
impl MessageHandler for OrderHandler {
    type MessageType = OrderMessage;

    fn handler_name(&self) -> &str {
        "OrderHandler"
    }

    async fn handle_message(
        &self,
        message: Self::MessageType,
        delivery: &Delivery,
    ) -> Result<CallbackResult, WorkerError> {
        log::info!(
            "Received order {} on Queue<{}>. Content: '{}'",
            message.id,
            delivery.queue,
            message.content
        );

        if message.id == 99 {
            log::info!("Simulating a long-running task...");
            tokio::time::sleep(Duration::from_secs(10)).await;
            log::info!("Long-running task finished.");
        }

        if message.id % 2 != 0 {
            log::warn!("Simulating a processing failure for order {}", message.id);
            return Err(WorkerError::from(format!(
                "Failed to process order with odd ID: {}",
                message.id
            )));
        }

        log::info!("Successfully processed order {}", message.id);
        Ok(CallbackResult::ack())
    }
}

/// Stops whichever consumer is current when Ctrl+C arrives.
fn install_ctrl_c(shutting_down: Arc<AtomicBool>, current: Arc<Mutex<Option<StopHandle>>>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Cannot listen for Ctrl+C: {}", e);
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            log::info!("Ctrl+C received. Shutting down.");
            shutting_down.store(true, Ordering::SeqCst);
            if let Some(stop) = current.lock().ok().and_then(|guard| guard.clone()) {
                stop.stop_consuming();
            }
        }
    });
}

fn run_once(config: ConsumerConfig, current: &Mutex<Option<StopHandle>>) -> Result<(), WorkerError> {
    let mut consumer = Consumer::connect(config)?.with_tracer(Arc::new(LogTracer));
    consumer.declare_and_bind(
        "orders",
        Some("orders-fanout"),
        None,
        Arc::new(JsonHandler::new(OrderHandler)),
    )?;
    if let Ok(mut guard) = current.lock() {
        *guard = Some(consumer.stop_handle());
    }

    let consumed = consumer.start_consuming();
    // Always drain in-flight handlers, even after a failure
    let closed = consumer.close();
    consumed.and(closed)
}

// 3. Configure and run the consumer
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ConsumerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };
    log::info!(
        "Consuming with {} worker(s), prefetch {}",
        config.pool_size,
        config.prefetch_count
    );

    let shutting_down = Arc::new(AtomicBool::new(false));
    let current = Arc::new(Mutex::new(None));
    install_ctrl_c(shutting_down.clone(), current.clone());

    let reconnect_delay = Duration::from_secs(5);

    // The application is in control of the run loop.
    while !shutting_down.load(Ordering::SeqCst) {
        match run_once(config.clone(), &current) {
            Ok(()) => {
                log::info!("Consumer finished.");
                break;
            }
            Err(e) => {
                log::error!("Consumer failed: {}. Reconnecting in {:?}...", e, reconnect_delay);
                std::thread::sleep(reconnect_delay);
            }
        }
    }

    log::info!("Application has shut down.");
}
