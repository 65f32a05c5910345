use std::future::Future;

use {
    anyhow::Result,
    toolmesh_common::time::unix_now,
    toolmesh_mcp::{Aggregator, AggregatorConfig},
    toolmesh_oauth::{AuthEngine, CredentialStore},
};

fn engine(config: &AggregatorConfig) -> Result<AuthEngine> {
    let store = CredentialStore::new(config.resolved_credentials_path());
    Ok(AuthEngine::new(config.effective_auth()?, store))
}

/// Drive `work`, cancelling any pending browser login on Ctrl-C. A second
/// Ctrl-C abandons `work` altogether.
pub(crate) async fn cancellable<T>(
    aggregator: &Aggregator,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    interruptible(work, tokio::signal::ctrl_c, || {
        eprintln!("Interrupted, cancelling... (press Ctrl-C again to abort)");
        if let Some(engine) = aggregator.engine() {
            engine.cancel_login();
        }
    })
    .await
}

async fn interruptible<T, S>(
    work: impl Future<Output = Result<T>>,
    mut interrupt: impl FnMut() -> S,
    on_first: impl FnOnce(),
) -> Result<T>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(work);
    tokio::select! {
        result = &mut work => return result,
        Ok(()) = interrupt() => on_first(),
    }
    tokio::select! {
        result = &mut work => result,
        Ok(()) = interrupt() => anyhow::bail!("interrupted"),
    }
}

pub async fn login(config: &AggregatorConfig, force: bool) -> Result<()> {
    let aggregator = Aggregator::from_config(config)?;
    let Some(engine) = aggregator.engine().cloned() else {
        anyhow::bail!("no authentication engine configured");
    };

    let tools = cancellable(&aggregator, async {
        if force || !engine.status().has_tokens {
            println!("Opening browser for authentication...");
            println!(
                "Waiting for callback on {} ...",
                engine.settings().redirect_uri()
            );
        }
        if force {
            engine.login().await?;
        }
        Ok::<_, anyhow::Error>(aggregator.login_only().await?)
    })
    .await?;

    let primary = config.primary()?;
    println!(
        "Logged in. {} tool(s) available from '{}'.",
        tools.len(),
        primary.name
    );
    Ok(())
}

pub fn logout(config: &AggregatorConfig) -> Result<()> {
    let engine = engine(config)?;
    engine.logout()?;
    println!(
        "Logged out. Removed {}",
        config.resolved_credentials_path().display()
    );
    Ok(())
}

pub fn status(config: &AggregatorConfig) -> Result<()> {
    let status = engine(config)?.status();

    println!("Credentials: {}", status.credentials_path);
    println!(
        "Client:      {}",
        status.client_id.as_deref().unwrap_or("not registered")
    );
    if !status.has_tokens {
        println!("Tokens:      none (run `toolmesh login`)");
        return Ok(());
    }

    let expiry = status.expires_at.map_or("no expiry".to_string(), |ts| {
        let now = unix_now();
        if ts > now {
            let remaining = ts - now;
            let hours = remaining / 3600;
            let mins = (remaining % 3600) / 60;
            format!("valid ({hours}h {mins}m remaining)")
        } else {
            "expired".to_string()
        }
    });
    let refresh = if status.has_refresh_token {
        "refreshable"
    } else {
        "no refresh token"
    };
    println!("Tokens:      {expiry}, {refresh}");
    Ok(())
}
