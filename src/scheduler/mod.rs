//! Очередь заданий и пул обработчиков.

pub mod ip_lock;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use ip_lock::{IpGuard, IpLocks};

use crate::collector::DeviceInfo;
use crate::config::settings::{DEFAULT_WORKERS, Settings};
use crate::error::JobError;

/// Задание для обработчика. Каждое задание выполняется ровно один раз.
#[derive(Clone)]
pub enum Job {
    CollectObject {
        ip: String,
        device: Arc<DeviceInfo>,
    },
    CollectMetrics {
        ip: String,
        device: Arc<DeviceInfo>,
    },
    /// Проверка адреса из подсети автообнаружения
    Discovery { ip: String, subnet: String },
    /// Подключение устройства с пользовательским профилем.
    ///
    /// `idx` указывает профиль для адресов из конфигурации; без него профиль
    /// выбирается по `device_type` или по ответу устройства.
    UserDiscovery {
        ip: String,
        idx: Option<usize>,
        device_type: String,
        tags: BTreeMap<String, String>,
    },
    CollectUserObject {
        ip: String,
        device: Arc<DeviceInfo>,
    },
    CollectUserMetrics {
        ip: String,
        device: Arc<DeviceInfo>,
    },
}

impl Job {
    pub fn ip(&self) -> &str {
        match self {
            Job::CollectObject { ip, .. }
            | Job::CollectMetrics { ip, .. }
            | Job::Discovery { ip, .. }
            | Job::UserDiscovery { ip, .. }
            | Job::CollectUserObject { ip, .. }
            | Job::CollectUserMetrics { ip, .. } => ip,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::CollectObject { .. } => "collect_object",
            Job::CollectMetrics { .. } => "collect_metrics",
            Job::Discovery { .. } => "discovery",
            Job::UserDiscovery { .. } => "user_discovery",
            Job::CollectUserObject { .. } => "collect_user_object",
            Job::CollectUserMetrics { .. } => "collect_user_metrics",
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("kind", &self.kind())
            .field("ip", &self.ip())
            .finish()
    }
}

/// Исполнитель заданий.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job);
}

/// Ограниченная очередь заданий, общая для всех обработчиков.
pub struct Scheduler {
    sender: mpsc::Sender<Job>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    ip_locks: Arc<IpLocks>,
    exit: CancellationToken,
    stop: CancellationToken,
}

impl Scheduler {
    pub fn new(exit: CancellationToken, stop: CancellationToken) -> Self {
        // отправитель ждет, пока обработчик не заберет задание
        let (sender, receiver) = mpsc::channel(1);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            ip_locks: Arc::new(IpLocks::new()),
            exit,
            stop,
        }
    }

    pub fn ip_locks(&self) -> &IpLocks {
        &self.ip_locks
    }

    /// Ставит задание в очередь, пока не отменен ни один из токенов.
    pub async fn send_job(&self, job: Job) -> Result<(), JobError> {
        tokio::select! {
            biased;
            _ = self.exit.cancelled() => Err(JobError::Exiting),
            _ = self.stop.cancelled() => Err(JobError::Stopped),
            sent = self.sender.send(job) => sent.map_err(|_| JobError::QueueClosed),
        }
    }

    /// Запускает `count` обработчиков.
    ///
    /// Перед выполнением задания обработчик берет блокировку его IP, так что
    /// два задания одного устройства никогда не выполняются одновременно.
    pub fn spawn_workers(
        &self,
        count: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Vec<JoinHandle<()>> {
        info!(workers = count, "Запуск обработчиков заданий");
        (0..count)
            .map(|idx| {
                let receiver = Arc::clone(&self.receiver);
                let ip_locks = Arc::clone(&self.ip_locks);
                let handler = Arc::clone(&handler);
                let (exit, stop) = (self.exit.clone(), self.stop.clone());

                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            biased;
                            _ = exit.cancelled() => break,
                            _ = stop.cancelled() => break,
                            job = async { receiver.lock().await.recv().await } => job,
                        };
                        let Some(job) = job else { break };

                        let Some(_guard) = ip_locks.acquire(job.ip(), &exit, &stop).await else {
                            debug!(?job, "Задание отброшено при остановке");
                            break;
                        };
                        debug!(?job, worker = idx, "Выполнение задания");
                        handler.handle(job).await;
                    }
                    debug!(worker = idx, "Обработчик завершен");
                })
            })
            .collect()
    }
}

/// Число обработчиков.
///
/// Явно заданное значение используется при автообнаружении, внешнем реестре
/// или если оно отличается от значения по умолчанию. Иначе по одному
/// обработчику на известный адрес.
pub fn worker_count(
    settings: &Settings,
    specific_devices: usize,
    user_profile_ips: Option<usize>,
) -> usize {
    let count = if !settings.auto_discovery.is_empty()
        || settings.service_discovery
        || settings.workers != DEFAULT_WORKERS
    {
        settings.workers
    } else if specific_devices > 0 {
        specific_devices
    } else {
        user_profile_ips.unwrap_or(settings.workers)
    };
    count.max(1)
}

/// Время следующей точки метрик.
///
/// Обычно это `last + interval`; если тик отклонился больше чем на десятую
/// часть интервала, берется время тика.
pub fn align_time(
    trigger: DateTime<Utc>,
    last: DateTime<Utc>,
    interval: Duration,
) -> DateTime<Utc> {
    let interval_ms = interval.as_millis() as i64;
    let tt = trigger.timestamp_millis();
    let mut next = last.timestamp_millis() + interval_ms;
    let diff = (tt - next).abs() as f64;
    if diff > 0.0 && interval_ms > 0 && diff / interval_ms as f64 > 0.1 {
        next = tt;
    }
    Utc.timestamp_millis_opt(next).single().unwrap_or(trigger)
}
