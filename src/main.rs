use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use clap::{Parser, Subcommand};
use notification_pipeline::{
    api::run_api_server,
    clients::{
        database::{BookingStore, PgBookingStore},
        health::HealthChecker,
        mail::{HttpMailSender, MailSender},
        rbmq::ConnectionManager,
        template::{HtmlTemplateBuilder, TemplateBuilder},
    },
    config::Config,
    consumer::{ConsumerSettings, ReliableConsumer},
    handlers::{
        AdminNotificationHandler, BookingConfirmationHandler, RescheduleConfirmationHandler,
    },
    shutdown::{Shutdown, wait_for_signal_or_exit},
    utils::init_tracing,
    wire::dead_letter_queue,
};
use tokio::{signal, task::JoinSet};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "notification_worker")]
#[command(version, about = "Booking notification worker with retry and dead-letter handling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start all consumers and the health server (default)
    Run,

    /// Move dead letters from <QUEUE>.dlq back onto <QUEUE>
    RequeueDlq {
        #[arg(long)]
        queue: String,

        /// Maximum number of messages to move
        #[arg(long, default_value_t = 100)]
        max: usize,
    },

    /// Print ready message counts for a queue and its dead-letter queue
    QueueDepth {
        #[arg(long)]
        queue: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let config = Config::load()?;
    init_tracing(config.log_format);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::RequeueDlq { queue, max } => requeue_dlq(&config, &queue, max).await,
        Command::QueueDepth { queue } => queue_depth(&config, &queue).await,
    }
}

async fn run(config: Config) -> Result<(), Error> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.broker_endpoint(),
        "Starting notification worker"
    );

    let shutdown = Shutdown::new();
    let manager = ConnectionManager::new(&config);
    let queues = manager.queue_names().clone();

    let store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::connect(&config.database_url).await?);
    let mailer: Arc<dyn MailSender> = Arc::new(HttpMailSender::new(&config)?);
    let templates: Arc<dyn TemplateBuilder> = Arc::new(HtmlTemplateBuilder::new());

    let booking_consumer = Arc::new(ReliableConsumer::new(
        manager.clone(),
        Arc::new(BookingConfirmationHandler::new(
            store.clone(),
            templates.clone(),
            mailer.clone(),
        )),
        ConsumerSettings::new(&queues.booking, &config),
    ));

    let admin_consumer = Arc::new(ReliableConsumer::new(
        manager.clone(),
        Arc::new(AdminNotificationHandler::new(mailer.clone())),
        ConsumerSettings::new(&queues.admin, &config),
    ));

    let reschedule_consumer = Arc::new(ReliableConsumer::new(
        manager.clone(),
        Arc::new(RescheduleConfirmationHandler::new(
            store.clone(),
            templates,
            mailer,
        )),
        ConsumerSettings::new(&queues.reschedule, &config),
    ));

    let health_checker = HealthChecker::new(manager.clone(), store)
        .with_consumer(booking_consumer.queue(), booking_consumer.state_receiver())
        .with_consumer(admin_consumer.queue(), admin_consumer.state_receiver())
        .with_consumer(
            reschedule_consumer.queue(),
            reschedule_consumer.state_receiver(),
        );

    let mut tasks = JoinSet::new();

    {
        let consumer = booking_consumer.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            consumer.run(shutdown).await;
            Ok::<(), Error>(())
        });
    }
    {
        let consumer = admin_consumer.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            consumer.run(shutdown).await;
            Ok(())
        });
    }
    {
        let consumer = reschedule_consumer.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            consumer.run(shutdown).await;
            Ok(())
        });
    }

    tasks.spawn(run_api_server(
        config.server_port,
        health_checker,
        shutdown.clone(),
    ));

    let task_failed = wait_for_signal_or_exit(&mut tasks, wait_for_signal()).await;
    if task_failed {
        error!("Shutting down after a worker task stopped unexpectedly");
    }

    shutdown.trigger();
    booking_consumer.stop();
    admin_consumer.stop();
    reschedule_consumer.stop();

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Worker task failed"),
            Err(e) => error!(error = %e, "Worker task panicked"),
        }
    }

    manager.shutdown().await;

    info!("Notification worker stopped");

    if task_failed {
        return Err(anyhow!("a worker task stopped before shutdown was requested"));
    }

    Ok(())
}

async fn requeue_dlq(config: &Config, queue: &str, max: usize) -> Result<(), Error> {
    let manager = ConnectionManager::new(config);

    let result = manager.requeue_dead_letters(queue, max).await;
    manager.shutdown().await;

    let requeued = result?;
    println!("Requeued {} message(s) from {} to {}", requeued, dead_letter_queue(queue), queue);

    Ok(())
}

async fn queue_depth(config: &Config, queue: &str) -> Result<(), Error> {
    let manager = ConnectionManager::new(config);
    let dlq = dead_letter_queue(queue);

    let depths = async {
        let ready = manager.queue_depth(queue).await?;
        let dead = manager.queue_depth(&dlq).await?;
        Ok::<_, Error>((ready, dead))
    }
    .await;

    manager.shutdown().await;

    let (ready, dead) = depths?;
    println!("{}: {} ready", queue, ready);
    println!("{}: {} ready", dlq, dead);

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
