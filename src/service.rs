//! Сервис сбора: устройства, расписание и обнаружение.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::device_info::DeviceSummary;
use crate::collector::user_profile::{ProfileProvider, ProfileStore, load_user_profiles, try_device};
use crate::collector::{DeviceInfo, DeviceOptions};
use crate::config::{AppConfig, ProfileDefinition, Settings};
use crate::discovery::{ServiceDiscovery, ServiceRecord, Subnet};
use crate::feeder::Feeder;
use crate::formatter::{Category, Point};
use crate::metrics::BandwidthState;
use crate::scheduler::{Job, JobHandler, Scheduler, align_time, worker_count};
use crate::snmp::session::DEVICE_REACHABLE_GET_NEXT_OID;
use crate::snmp::{Session, SessionFactory};

type DeviceMap = RwLock<BTreeMap<String, Arc<DeviceInfo>>>;

/// Списки устройств для страницы состояния.
#[derive(Debug, Clone, Serialize)]
pub struct DevicesOverview {
    #[serde(rename = "static")]
    pub specific: Vec<DeviceSummary>,
    pub dynamic: Vec<DeviceSummary>,
    pub user: Vec<DeviceSummary>,
}

/// Состояние одного экземпляра сборщика.
pub struct Collector {
    settings: Settings,
    profile: Arc<ProfileDefinition>,
    options: Arc<DeviceOptions>,
    factory: Arc<dyn SessionFactory>,
    feeder: Arc<dyn Feeder>,

    subnets: Vec<Subnet>,
    ignored_ips: HashSet<String>,
    stores: Vec<ProfileStore>,
    service_discovery: Option<ServiceDiscovery>,

    specific_devices: DeviceMap,
    dynamic_devices: DeviceMap,
    user_devices: DeviceMap,

    bandwidth: BandwidthState,
    pts_time: Mutex<DateTime<Utc>>,
    discovery_running: AtomicBool,

    scheduler: Scheduler,
    exit: CancellationToken,
    stop: CancellationToken,
}

impl Collector {
    /// Проверяет настройки, загружает профили и подключает устройства из
    /// `specific_devices`.
    ///
    /// Ошибка подключения любого такого устройства останавливает запуск.
    pub async fn new(
        config: AppConfig,
        factory: Arc<dyn SessionFactory>,
        feeder: Arc<dyn Feeder>,
        provider: &dyn ProfileProvider,
        exit: CancellationToken,
    ) -> Result<Arc<Self>> {
        let AppConfig {
            profile,
            mut settings,
        } = config;
        settings.validate().context("invalid settings")?;

        let subnets = settings
            .auto_discovery
            .iter()
            .map(|cidr| Subnet::parse(cidr))
            .collect::<Result<Vec<_>, _>>()?;

        let stores = if settings.user_profiles.is_empty() {
            Vec::new()
        } else {
            let stores = load_user_profiles(provider, &settings.user_profiles);
            if stores.is_empty() {
                bail!("load no user defined profiles");
            }
            if !settings.specific_devices.is_empty() {
                info!("В режиме пользовательских профилей specific_devices не используются");
                settings.specific_devices.clear();
            }
            stores
        };

        let service_discovery = if settings.service_discovery {
            Some(ServiceDiscovery::new(
                settings.instance_ip_key.clone(),
                &settings.module_regexps,
            )?)
        } else {
            None
        };

        let stop = CancellationToken::new();
        let collector = Self {
            options: Arc::new(DeviceOptions::from_settings(&settings)),
            profile: Arc::new(profile),
            factory,
            feeder,
            subnets,
            ignored_ips: settings.discovery_ignored_ip.iter().cloned().collect(),
            stores,
            service_discovery,
            specific_devices: RwLock::default(),
            dynamic_devices: RwLock::default(),
            user_devices: RwLock::default(),
            bandwidth: BandwidthState::new(),
            pts_time: Mutex::new(Utc::now()),
            discovery_running: AtomicBool::new(false),
            scheduler: Scheduler::new(exit.clone(), stop.clone()),
            exit,
            stop,
            settings,
        };

        collector.initialize_specific_devices().await?;
        Ok(Arc::new(collector))
    }

    pub fn is_user_mode(&self) -> bool {
        !self.stores.is_empty()
    }

    /// Останавливает сбор; `run` завершается и закрывает сессии.
    pub fn terminate(&self) {
        self.stop.cancel();
    }

    fn is_stopping(&self) -> bool {
        self.exit.is_cancelled() || self.stop.is_cancelled()
    }

    async fn initialize_specific_devices(&self) -> Result<()> {
        let mut devices = self.specific_devices.write().await;
        for ip in &self.settings.specific_devices {
            let device = self
                .initialize_device(ip, "")
                .await
                .with_context(|| format!("failed to initialize device {}", ip))?;
            devices.insert(ip.clone(), Arc::new(device));
        }
        Ok(())
    }

    async fn connect(&self, ip: &str, community: Option<&str>) -> Result<Box<dyn Session>> {
        let options = self.settings.session_options(ip, community)?;
        let session = self.factory.connect(&options).await?;
        Ok(session)
    }

    async fn initialize_device(&self, ip: &str, subnet: &str) -> Result<DeviceInfo> {
        let session = self.connect(ip, None).await?;
        Ok(DeviceInfo::new(
            ip,
            subnet,
            session,
            Arc::clone(&self.profile),
            Arc::clone(&self.options),
        ))
    }

    /// Основной цикл: запускает обработчики, первый сбор и таймеры.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let object_interval = self.settings.object_interval()?;
        let metric_interval = self.settings.metric_interval()?;
        let discovery_interval = self.settings.discovery_interval()?;

        let user_ips = self
            .is_user_mode()
            .then(|| self.stores.iter().map(|s| s.ip_list.len()).sum());
        let workers = worker_count(
            &self.settings,
            self.specific_devices.read().await.len(),
            user_ips,
        );
        let handles = self
            .scheduler
            .spawn_workers(workers, Arc::clone(&self) as Arc<dyn JobHandler>);

        self.init_user_definition().await;
        self.user_auto_discovery();
        self.auto_discovery().await;
        self.collect_object().await;
        self.collect_metrics().await;

        let mut ticker_object = interval_after(object_interval);
        let mut ticker_metric = interval_after(metric_interval);
        let mut ticker_discovery = interval_after(discovery_interval);
        self.set_pts_time(Utc::now());

        loop {
            tokio::select! {
                biased;
                _ = self.exit.cancelled() => {
                    info!("snmp exit");
                    break;
                }
                _ = self.stop.cancelled() => {
                    info!("snmp return");
                    break;
                }
                _ = ticker_object.tick() => self.collect_object().await,
                _ = ticker_metric.tick() => {
                    let last = self.pts_time();
                    self.set_pts_time(align_time(Utc::now(), last, metric_interval));
                    self.collect_metrics().await;
                }
                _ = ticker_discovery.tick() => {
                    self.user_auto_discovery();
                    self.auto_discovery().await;
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Обработчик завершился с ошибкой");
            }
        }
        self.shutdown().await;
        Ok(())
    }

    fn pts_time(&self) -> DateTime<Utc> {
        *self.pts_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_pts_time(&self, time: DateTime<Utc>) {
        *self.pts_time.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }

    /// Закрывает сессии всех устройств.
    pub async fn shutdown(&self) {
        for device in self.specific_devices.read().await.values() {
            device.close().await;
        }
        let dynamic = std::mem::take(&mut *self.dynamic_devices.write().await);
        for (ip, device) in dynamic {
            debug!(ip = %ip, "Закрытие сессии");
            device.close().await;
        }
        for device in self.user_devices.read().await.values() {
            device.close().await;
        }
    }

    async fn send_jobs(&self, jobs: impl IntoIterator<Item = Job>) {
        for job in jobs {
            if let Err(e) = self.scheduler.send_job(job).await {
                warn!(error = %e, "sendJob");
                return;
            }
        }
    }

    /// Ставит задания на сбор объектов по всем устройствам.
    pub async fn collect_object(&self) {
        if self.is_user_mode() {
            let jobs = snapshot(&self.user_devices)
                .await
                .into_iter()
                .map(|(ip, device)| Job::CollectUserObject { ip, device });
            self.send_jobs(jobs).await;
            return;
        }

        let mut devices = snapshot(&self.specific_devices).await;
        devices.extend(snapshot(&self.dynamic_devices).await);
        self.send_jobs(
            devices
                .into_iter()
                .map(|(ip, device)| Job::CollectObject { ip, device }),
        )
        .await;
    }

    /// Ставит задания на сбор метрик по всем устройствам.
    pub async fn collect_metrics(&self) {
        if self.is_user_mode() {
            let jobs = snapshot(&self.user_devices)
                .await
                .into_iter()
                .map(|(ip, device)| Job::CollectUserMetrics { ip, device });
            self.send_jobs(jobs).await;
            return;
        }

        let mut devices = snapshot(&self.specific_devices).await;
        devices.extend(snapshot(&self.dynamic_devices).await);
        self.send_jobs(
            devices
                .into_iter()
                .map(|(ip, device)| Job::CollectMetrics { ip, device }),
        )
        .await;
    }

    /// Подключает адреса, перечисленные в пользовательских профилях.
    pub async fn init_user_definition(&self) {
        let jobs: Vec<Job> = self
            .stores
            .iter()
            .enumerate()
            .flat_map(|(idx, store)| {
                store.ip_list.iter().map(move |ip| Job::UserDiscovery {
                    ip: ip.clone(),
                    idx: Some(idx),
                    device_type: String::new(),
                    tags: BTreeMap::new(),
                })
            })
            .collect();
        self.send_jobs(jobs).await;
    }

    /// Обход подсетей для пользовательских профилей в фоне.
    ///
    /// Если предыдущий обход еще идет, новый не запускается.
    pub fn user_auto_discovery(self: &Arc<Self>) {
        if !self.is_user_mode() || self.subnets.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if this
                .discovery_running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("Предыдущее обнаружение еще выполняется");
                return;
            }
            for subnet in &this.subnets {
                debug!(subnet = %subnet, "Run discovery");
                if !this.dispatch_user_discovery(subnet).await || this.is_stopping() {
                    debug!(subnet = %subnet, "Stop scheduling devices");
                    break;
                }
            }
            this.discovery_running.store(false, Ordering::Release);
        });
    }

    async fn dispatch_user_discovery(&self, subnet: &Subnet) -> bool {
        for ip in subnet.hosts() {
            let ip = ip.to_string();
            if self.ignored_ips.contains(&ip) {
                continue;
            }
            let job = Job::UserDiscovery {
                ip,
                idx: None,
                device_type: String::new(),
                tags: BTreeMap::new(),
            };
            if let Err(e) = self.scheduler.send_job(job).await {
                warn!(subnet = %subnet, error = %e, "sendJob");
                return false;
            }
        }
        true
    }

    /// Обход подсетей для устройств с профилем метрик в фоне.
    ///
    /// Адреса из `specific_devices` и `discovery_ignored_ip` пропускаются.
    pub async fn auto_discovery(self: &Arc<Self>) {
        if self.is_user_mode() || self.subnets.is_empty() {
            return;
        }
        let specific: HashSet<String> = self.specific_devices.read().await.keys().cloned().collect();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if this
                .discovery_running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("Предыдущее обнаружение еще выполняется");
                return;
            }
            'subnets: for subnet in &this.subnets {
                debug!(subnet = %subnet, "Run discovery");
                let cidr = subnet.cidr();
                for ip in subnet.hosts() {
                    let ip = ip.to_string();
                    if this.ignored_ips.contains(&ip) || specific.contains(&ip) {
                        continue;
                    }
                    let job = Job::Discovery {
                        ip,
                        subnet: cidr.clone(),
                    };
                    if let Err(e) = this.scheduler.send_job(job).await {
                        warn!(subnet = %cidr, error = %e, "sendJob on subnet");
                        break 'subnets;
                    }
                }
            }
            this.discovery_running.store(false, Ordering::Release);
        });
    }

    /// Применяет снимок внешнего реестра: новые записи ставятся на
    /// подключение, пропавшие адреса отключаются.
    pub async fn apply_service_snapshot(&self, index: u64, records: &[ServiceRecord]) {
        let Some(discovery) = &self.service_discovery else {
            warn!("Внешний реестр сервисов не настроен");
            return;
        };

        let diff = discovery.apply_snapshot(index, records);
        for ip in &diff.removed {
            let removed = self.user_devices.write().await.remove(ip);
            if let Some(device) = removed {
                info!(ip = %ip, "Устройство удалено из реестра");
                device.close().await;
            }
        }
        let jobs = diff.added.into_iter().map(|service| Job::UserDiscovery {
            ip: service.ip,
            idx: None,
            device_type: service.device_type,
            tags: service.tags,
        });
        self.send_jobs(jobs).await;
    }

    async fn feed(&self, category: Category, points: Vec<Point>, ip: &str) {
        if points.is_empty() {
            return;
        }
        if let Err(e) = self.feeder.feed(category, points).await {
            error!(ip = %ip, ?category, error = %format!("{:#}", e), "Не удалось передать записи");
        }
    }

    async fn do_collect_object(&self, ip: &str, device: &DeviceInfo) {
        let points = device.collect(&self.bandwidth, true, Utc::now()).await;
        self.feed(Category::Object, points, ip).await;
    }

    async fn do_collect_metrics(&self, ip: &str, device: &DeviceInfo) {
        let points = device.collect(&self.bandwidth, false, self.pts_time()).await;
        self.feed(Category::Metric, points, ip).await;
    }

    async fn do_collect_user(&self, ip: &str, device: &DeviceInfo, collect_object: bool) {
        let (category, time) = if collect_object {
            (Category::CustomObject, Utc::now())
        } else {
            (Category::Metric, self.pts_time())
        };
        match device.collect_user(collect_object, time).await {
            Ok(points) => {
                debug!(ip = %ip, points = points.len(), "Собраны записи пользовательского профиля");
                self.feed(category, points, ip).await;
            }
            Err(e) => debug!(ip = %ip, error = %format!("{:#}", e), "Сбор по профилю не удался"),
        }
    }

    /// Проверяет адрес подсети и добавляет или удаляет динамическое устройство.
    pub async fn do_auto_discovery(&self, ip: &str, subnet: &str) {
        let mut session = match self.connect(ip, None).await {
            Ok(session) => session,
            Err(e) => {
                debug!(ip = %ip, error = %format!("{:#}", e), "SNMP connect error");
                self.remove_dynamic_device(ip).await;
                return;
            }
        };

        let reachable = session
            .get_next(&[DEVICE_REACHABLE_GET_NEXT_OID.to_string()])
            .await;
        if let Err(e) = session.close().await {
            debug!(ip = %ip, error = %e, "Не удалось закрыть сессию проверки");
        }

        match reachable {
            Err(e) => {
                debug!(ip = %ip, error = %e, "SNMP get error");
                self.remove_dynamic_device(ip).await;
            }
            Ok(packet) if packet.variables.first().is_none_or(|v| v.value.is_missing()) => {
                debug!(ip = %ip, "SNMP get: no data");
                self.remove_dynamic_device(ip).await;
            }
            Ok(_) => self.add_dynamic_device(ip, subnet).await,
        }
    }

    async fn add_dynamic_device(&self, ip: &str, subnet: &str) {
        if self.dynamic_devices.read().await.contains_key(ip) {
            return;
        }
        match self.initialize_device(ip, subnet).await {
            Ok(device) => {
                info!(ip = %ip, subnet = %subnet, "Найдено устройство");
                self.dynamic_devices
                    .write()
                    .await
                    .insert(ip.to_string(), Arc::new(device));
            }
            Err(e) => error!(ip = %ip, error = %format!("{:#}", e), "Не удалось инициализировать устройство"),
        }
    }

    async fn remove_dynamic_device(&self, ip: &str) {
        let removed = self.dynamic_devices.write().await.remove(ip);
        if let Some(device) = removed {
            info!(ip = %ip, "Устройство недоступно, удалено");
            device.close().await;
        }
    }

    /// Выбирает профиль для адреса и подключает устройство.
    ///
    /// Профиль берется по `device_type`, по индексу из конфигурации или
    /// подбирается по sysObjectID устройства.
    pub async fn do_after_discovery(
        &self,
        idx: Option<usize>,
        ip: &str,
        device_type: &str,
        tags: BTreeMap<String, String>,
    ) {
        if !self.is_user_mode() {
            return;
        }

        if !device_type.is_empty() {
            match self
                .stores
                .iter()
                .position(|s| s.definition.device_type == device_type)
            {
                Some(i) => self.add_user_device(i, ip, tags).await,
                None => warn!("stores have not this device type: {}", device_type),
            }
            return;
        }

        debug!(?idx, ip = %ip, "discovery");
        if self.user_devices.read().await.contains_key(ip) {
            debug!(ip = %ip, "device ip already in collect array");
            return;
        }

        if let Some(idx) = idx {
            self.add_user_device(idx, ip, tags).await;
            return;
        }

        let mut session = match self.connect(ip, None).await {
            Ok(session) => session,
            Err(e) => {
                debug!(ip = %ip, error = %format!("{:#}", e), "SNMP connect error");
                return;
            }
        };
        let found = detect_user_device(session.as_mut(), ip, &self.stores).await;
        if let Err(e) = session.close().await {
            debug!(ip = %ip, error = %e, "Не удалось закрыть сессию проверки");
        }

        match found {
            Ok(idx) => {
                debug!(ip = %ip, store = idx, "add device");
                self.add_user_device(idx, ip, tags).await;
            }
            Err(e) => debug!(ip = %ip, error = %format!("{:#}", e), "compare stores fail"),
        }
    }

    async fn add_user_device(&self, idx: usize, ip: &str, tags: BTreeMap<String, String>) {
        let Some(store) = self.stores.get(idx) else {
            return;
        };
        let community = Some(store.definition.community.as_str());
        let mut session = match self.connect(ip, community).await {
            Ok(session) => session,
            Err(e) => {
                error!(ip = %ip, error = %format!("{:#}", e), "Не удалось открыть сессию");
                return;
            }
        };

        let mut definition = store.definition.clone();
        definition.input_tags.extend(self.settings.tags.clone());
        definition.input_tags.extend(tags);
        if let Err(e) = definition
            .pre_process(session.as_mut(), ip, &self.options.key_rules)
            .await
        {
            warn!(ip = %ip, error = %format!("{:#}", e), "Ошибка предобработки профиля");
        }

        let device = Arc::new(DeviceInfo::with_user_profile(
            ip,
            session,
            definition,
            Arc::clone(&self.options),
        ));
        info!(ip = %ip, profile = %store.definition.profile_name, "Устройство подключено");
        let previous = self
            .user_devices
            .write()
            .await
            .insert(ip.to_string(), device);
        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    /// Сводка по всем известным устройствам.
    pub async fn devices(&self) -> DevicesOverview {
        async fn summaries(map: &DeviceMap) -> Vec<DeviceSummary> {
            map.read().await.values().map(|d| d.summary()).collect()
        }
        DevicesOverview {
            specific: summaries(&self.specific_devices).await,
            dynamic: summaries(&self.dynamic_devices).await,
            user: summaries(&self.user_devices).await,
        }
    }
}

#[async_trait]
impl JobHandler for Collector {
    async fn handle(&self, job: Job) {
        match job {
            Job::CollectObject { ip, device } => self.do_collect_object(&ip, &device).await,
            Job::CollectMetrics { ip, device } => self.do_collect_metrics(&ip, &device).await,
            Job::Discovery { ip, subnet } => self.do_auto_discovery(&ip, &subnet).await,
            Job::UserDiscovery {
                ip,
                idx,
                device_type,
                tags,
            } => self.do_after_discovery(idx, &ip, &device_type, tags).await,
            Job::CollectUserObject { ip, device } => {
                self.do_collect_user(&ip, &device, true).await
            }
            Job::CollectUserMetrics { ip, device } => {
                self.do_collect_user(&ip, &device, false).await
            }
        }
    }
}

async fn snapshot(map: &DeviceMap) -> Vec<(String, Arc<DeviceInfo>)> {
    map.read()
        .await
        .iter()
        .map(|(ip, device)| (ip.clone(), Arc::clone(device)))
        .collect()
}

async fn detect_user_device(
    session: &mut dyn Session,
    ip: &str,
    stores: &[ProfileStore],
) -> Result<usize> {
    let packet = session
        .get_next(&[DEVICE_REACHABLE_GET_NEXT_OID.to_string()])
        .await
        .with_context(|| format!("SNMP get to {} error", ip))?;
    if packet.variables.first().is_none_or(|v| v.value.is_missing()) {
        bail!("SNMP get to {} no data", ip);
    }
    try_device(session, ip, stores).await
}

fn interval_after(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
