use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::booking::BookingService;

/// Период очистки, если в конфиге пришло неположительное значение.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

/// Итог одного прохода очистки.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub released_seats: usize,
    pub deleted_bookings: usize,
}

/// Фоновая задача: раз в `interval` удаляет просроченные неподтверждённые
/// брони и возвращает их места в счётчик события.
pub struct ExpirationSweeper {
    service: BookingService,
    interval: Duration,
    run_timeout: Duration,
}

impl ExpirationSweeper {
    pub fn new(service: BookingService, interval_secs: i64, run_timeout: Duration) -> Self {
        let interval = match u64::try_from(interval_secs) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!(interval_secs, fallback = ?FALLBACK_INTERVAL, "non-positive sweeper interval, using fallback");
                FALLBACK_INTERVAL
            }
        };
        Self::with_interval(service, interval, run_timeout)
    }

    pub fn with_interval(service: BookingService, interval: Duration, run_timeout: Duration) -> Self {
        let interval = if interval.is_zero() { FALLBACK_INTERVAL } else { interval };
        Self {
            service,
            interval,
            run_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Запускает цикл. Проходы не пересекаются: следующий тик ждёт
    /// завершения текущего. Останавливается по `cancel`.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, run_timeout = ?self.run_timeout, "expiration sweeper started");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("expiration sweeper stopped");
    }

    /// Один проход с ограничением по времени. Ошибки только логируются,
    /// следующий тик попробует снова.
    pub async fn run_once(&self) -> Option<SweepReport> {
        match tokio::time::timeout(self.run_timeout, self.service.clean_expired_bookings()).await {
            Ok(Ok(report)) => {
                if report.deleted_bookings > 0 {
                    info!(
                        deleted = report.deleted_bookings,
                        released = report.released_seats,
                        "expired bookings swept"
                    );
                } else {
                    debug!("no expired bookings");
                }
                Some(report)
            }
            Ok(Err(e)) => {
                error!(error = %e, "expired bookings sweep failed");
                None
            }
            Err(_) => {
                error!(timeout = ?self.run_timeout, "expired bookings sweep timed out");
                None
            }
        }
    }
}
