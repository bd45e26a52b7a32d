use std::sync::Arc;

use salon_push::push::{
    CacheDomain, CacheInvalidationPort, Notifier, ToastVariant, UnsupportedSystemNotifier,
};
use salon_push::{init_tracing, NotificationCenter, Ports, PushConfig, Session, SessionStore};

/// Prints what a UI would show.
struct TailPrinter;

impl Notifier for TailPrinter {
    fn show(&self, title: &str, message: &str, variant: ToastVariant) {
        println!("[{variant}] {title}: {message}");
    }
}

impl CacheInvalidationPort for TailPrinter {
    fn invalidate(&self, domain: CacheDomain, scope_id: &str) {
        println!("~ {domain} changed for store {scope_id}");
    }
}

fn session_from_env() -> Result<Session, String> {
    let var = |key: &str| {
        std::env::var(key)
            .ok()
            .filter(|v| !v.trim().is_empty())
    };
    let user_id = var("SALON_USER_ID").ok_or("SALON_USER_ID is not set")?;
    let access_token = var("SALON_ACCESS_TOKEN").ok_or("SALON_ACCESS_TOKEN is not set")?;
    Ok(Session::new(user_id, access_token, var("SALON_REFRESH_TOKEN")))
}

#[tokio::main]
async fn main() {
    init_tracing("salon_push=debug,info");

    if let Err(error) = run().await {
        eprintln!("push-tail failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = PushConfig::from_env().map_err(|e| e.to_string())?;
    let session = Arc::new(SessionStore::new(Some(session_from_env()?)));

    let printer = Arc::new(TailPrinter);
    let ports = Ports {
        cache: printer.clone(),
        notifier: printer,
        system: Arc::new(UnsupportedSystemNotifier),
    };

    let center = Arc::new(
        NotificationCenter::new(&config, session, ports).map_err(|e| e.to_string())?,
    );
    center.start();

    let mut state = center.watch_state();
    let watcher = {
        let center = Arc::clone(&center);
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                println!(
                    "connection {current} ({} notifications, {} unread)",
                    center.notifications().len(),
                    center.unread_count()
                );
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for Ctrl-C: {e}"))?;

    watcher.abort();
    center.shutdown();
    if let Some(activity) = center.latest_activity() {
        println!("last activity: {} ({})", activity.message, activity.kind);
    }
    Ok(())
}
