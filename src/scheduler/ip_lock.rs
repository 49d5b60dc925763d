use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Адреса, по которым сейчас выполняются или ждут задания.
///
/// Запись живет, пока ее держит или ждет хотя бы одно задание.
#[derive(Debug, Default)]
pub struct IpLocks {
    locks: LockMap,
}

/// Удерживает блокировку адреса до освобождения.
#[derive(Debug)]
pub struct IpGuard {
    ip: String,
    locks: LockMap,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IpGuard {
    pub fn ip(&self) -> &str {
        &self.ip
    }
}

impl Drop for IpGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        release(&self.locks, &self.ip, &self.lock);
    }
}

/// Удаляет запись, если кроме карты ее держит только `lock`.
fn release(locks: &LockMap, ip: &str, lock: &Arc<AsyncMutex<()>>) {
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    if Arc::strong_count(lock) == 2 && locks.get(ip).is_some_and(|l| Arc::ptr_eq(l, lock)) {
        locks.remove(ip);
    }
}

impl IpLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, ip: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(ip.to_string()).or_default())
    }

    /// Ждет блокировку адреса; `None`, если раньше отменен один из токенов.
    pub async fn acquire(
        &self,
        ip: &str,
        exit: &CancellationToken,
        stop: &CancellationToken,
    ) -> Option<IpGuard> {
        let lock = self.lock_for(ip);
        let guard = tokio::select! {
            biased;
            _ = exit.cancelled() => None,
            _ = stop.cancelled() => None,
            guard = Arc::clone(&lock).lock_owned() => Some(guard),
        };
        match guard {
            Some(guard) => Some(IpGuard {
                ip: ip.to_string(),
                locks: Arc::clone(&self.locks),
                lock,
                guard: Some(guard),
            }),
            None => {
                release(&self.locks, ip, &lock);
                None
            }
        }
    }

    /// Занят ли адрес сейчас.
    pub fn is_busy(&self, ip: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.get(ip).is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Число адресов в работе.
    pub fn in_flight(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_ip_waits_for_release() {
        let locks = Arc::new(IpLocks::new());
        let (exit, stop) = (CancellationToken::new(), CancellationToken::new());

        let guard = locks.acquire("10.0.0.1", &exit, &stop).await.unwrap();
        assert!(locks.is_busy("10.0.0.1"));
        assert!(!locks.is_busy("10.0.0.2"));

        let other = locks.acquire("10.0.0.2", &exit, &stop).await;
        assert!(other.is_some());

        let waiter = {
            let locks = Arc::clone(&locks);
            let (exit, stop) = (exit.clone(), stop.clone());
            tokio::spawn(async move { locks.acquire("10.0.0.1", &exit, &stop).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert!(waiter.await.unwrap());
        assert_eq!(locks.in_flight(), 1);
        drop(other);
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_wait_returns_none() {
        let locks = IpLocks::new();
        let (exit, stop) = (CancellationToken::new(), CancellationToken::new());
        let _held = locks.acquire("10.0.0.1", &exit, &stop).await.unwrap();

        stop.cancel();
        assert!(locks.acquire("10.0.0.1", &exit, &stop).await.is_none());
        assert_eq!(locks.in_flight(), 1);
        assert!(locks.acquire("10.0.0.2", &exit, &stop).await.is_none());
        assert_eq!(locks.in_flight(), 1);
    }

    #[tokio::test]
    async fn released_addresses_leave_the_map() {
        let locks = IpLocks::new();
        let (exit, stop) = (CancellationToken::new(), CancellationToken::new());

        for i in 0..1000u32 {
            let ip = std::net::Ipv4Addr::from(0x0a00_0000 + i).to_string();
            let guard = locks.acquire(&ip, &exit, &stop).await.unwrap();
            assert!(locks.is_busy(guard.ip()));
        }
        assert_eq!(locks.in_flight(), 0);
        assert!(!locks.is_busy("10.0.0.1"));
    }
}
