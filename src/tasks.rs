use chrono::{Datelike, Timelike, Utc};
use chrono_tz::America::Los_Angeles;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::tokio;
use rocket::{Orbit, Rocket};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::DbPool;
use crate::digest;
use crate::email::Mailer;

pub struct BackgroundTasks;

#[rocket::async_trait]
impl Fairing for BackgroundTasks {
    fn info(&self) -> Info {
        Info {
            name: "Background Tasks",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let pool = rocket
            .state::<DbPool>()
            .expect("DbPool not found in managed state")
            .clone();
        let config = rocket
            .state::<Config>()
            .expect("Config not found in managed state")
            .clone();
        let mailer = rocket
            .state::<Arc<dyn Mailer>>()
            .expect("Mailer not found in managed state")
            .clone();

        // Weekly digest sweep. Checked hourly; fires in the Monday 08:00
        // window in the digest timezone. The sweep's own cooldown and the
        // per-period digest_log uniqueness make extra triggers harmless.
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                let local = Utc::now().with_timezone(&Los_Angeles);
                if local.weekday() != chrono::Weekday::Mon || local.hour() != 8 {
                    continue;
                }
                let p = pool.clone();
                let c = config.clone();
                let m = Arc::clone(&mailer);
                let result = tokio::task::spawn_blocking(move || {
                    digest::run_for_all(&p, &c, &*m)
                })
                .await;
                match result {
                    Ok(summary) => log::info!(
                        "[task] Weekly digest sweep: status={} sent={} errors={}",
                        summary.status,
                        summary.sent,
                        summary.errors
                    ),
                    Err(e) => log::error!("[task] Weekly digest sweep panicked: {}", e),
                }
            }
        });

        log::info!("[task] Background tasks started");
    }
}
