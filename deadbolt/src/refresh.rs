//! Token refresh decisions.

use chrono::{DateTime, Utc};
use log::*;

use crate::context::{ProviderData, RequestContext};
use crate::error::{flow_error, Error, FlowErrorKind};
use crate::hooks::{Hook, HookPipeline};
use crate::provider::{RegisteredProvider, Registry};

/// What to do with one connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// The refresh token has expired; the account cannot be recovered.
    Unrecoverable,
    /// The access token has expired; refresh it.
    Expired,
    /// No access token expiry is known; try to use it and refresh on failure.
    Unknown,
    Fresh,
}

/// Classify `data` at `now`.
pub fn decide(data: &ProviderData, now: DateTime<Utc>) -> RefreshDecision {
    if data.is_refresh_token_expired(now) {
        RefreshDecision::Unrecoverable
    } else if data.is_access_token_expired(now) {
        RefreshDecision::Expired
    } else if data.access_token_expires.is_none() {
        RefreshDecision::Unknown
    } else {
        RefreshDecision::Fresh
    }
}

/// True when there is nothing usable stored for `provider`.
pub fn is_disconnected(ctx: &RequestContext, provider: &str, now: DateTime<Utc>) -> bool {
    ctx.provider_data(provider)
        .map(|data| data.is_refresh_token_expired(now))
        .unwrap_or(true)
}

enum Sweep {
    Completed,
    /// An unrecoverable account stopped the loop.
    Aborted,
}

/// Refresh the tokens of one provider (`filter`) or of every registered provider.
///
/// The active provider of the context is swapped for each iteration and restored
/// afterwards. Providers are handled one after another.
///
/// With `redirect_to_login` and a targeted provider that ends up disconnected, the
/// user is sent to the login page; when the exchange has no redirect channel this
/// fails with `FlowErrorKind::LoginRedirectFailed`. Broad sweeps never redirect.
pub async fn refresh_if_necessary(
    registry: &Registry,
    hooks: &HookPipeline,
    ctx: &mut RequestContext,
    filter: Option<&str>,
    redirect_to_login: bool,
) -> Result<(), Error> {
    let saved_name = ctx.flow.provider.clone();
    let saved_provider = ctx.provider.clone();

    let result = sweep(registry, hooks, ctx, filter).await;

    ctx.flow.provider = saved_name;
    ctx.provider = saved_provider;

    if let Sweep::Aborted = result? {
        debug!("Refresh sweep aborted on an unrecoverable account");
    }

    let Some(target) = filter else {
        return Ok(());
    };
    if redirect_to_login && is_disconnected(ctx, target, Utc::now()) {
        let login_page_url = ctx.config.login_page_url().to_string();
        info!("{} is disconnected, redirecting to the login page", target);
        if !ctx.redirect(&login_page_url, &[])? {
            return Err(flow_error(
                FlowErrorKind::LoginRedirectFailed,
                &format!("Cannot redirect to {}", login_page_url),
            ));
        }
    }
    Ok(())
}

async fn sweep(
    registry: &Registry,
    hooks: &HookPipeline,
    ctx: &mut RequestContext,
    filter: Option<&str>,
) -> Result<Sweep, Error> {
    let targets: Vec<&RegisteredProvider> = registry
        .iter()
        .filter(|entry| filter.map_or(true, |name| entry.name() == name))
        .collect();

    for entry in targets {
        let name = entry.name().to_string();
        ctx.flow.provider = name.clone();
        ctx.provider = Some(entry.provider.clone());

        hooks.run(Hook::RetrieveData, ctx).await?;

        if !entry.capabilities.refresh {
            continue;
        }
        let Some(data) = ctx.provider_data(&name) else {
            continue;
        };

        match decide(data, Utc::now()) {
            RefreshDecision::Unrecoverable => {
                info!("Refresh token for {} has expired", name);
                return Ok(Sweep::Aborted);
            }
            RefreshDecision::Expired => {
                debug!("Access token for {} has expired, refreshing", name);
                refresh_and_store(entry, hooks, ctx).await?;
            }
            RefreshDecision::Unknown => {
                let loaded = if entry.capabilities.load_data {
                    entry.provider.load_data(ctx).await
                } else {
                    Ok(())
                };
                match loaded {
                    Ok(()) => {}
                    Err(err) if err.is_transient_load_failure() => {
                        debug!("Loading data for {} failed ({}), refreshing", name, err);
                        refresh_and_store(entry, hooks, ctx).await?;
                    }
                    Err(err) => return Err(err),
                }
            }
            RefreshDecision::Fresh => {}
        }
    }

    Ok(Sweep::Completed)
}

async fn refresh_and_store(
    entry: &RegisteredProvider,
    hooks: &HookPipeline,
    ctx: &mut RequestContext,
) -> Result<(), Error> {
    entry.provider.refresh(ctx).await?;
    hooks.run(Hook::StoreData, ctx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use secrecy::SecretString;

    fn data(access: Option<Duration>, refresh: Option<Duration>) -> ProviderData {
        let now = Utc::now();
        ProviderData {
            access_token: Some(SecretString::new("at".to_string())),
            access_token_expires: access.map(|d| now + d),
            refresh_token: Some(SecretString::new("rt".to_string())),
            refresh_token_expires: refresh.map(|d| now + d),
            ..Default::default()
        }
    }

    #[test]
    fn test_expired_refresh_token_is_unrecoverable() {
        let data = data(Some(-Duration::hours(1)), Some(-Duration::minutes(1)));
        assert_eq!(decide(&data, Utc::now()), RefreshDecision::Unrecoverable);
    }

    #[test]
    fn test_expired_access_token_needs_refresh() {
        let data = data(Some(-Duration::hours(1)), Some(Duration::days(30)));
        assert_eq!(decide(&data, Utc::now()), RefreshDecision::Expired);
    }

    #[test]
    fn test_missing_expiry_is_unknown() {
        let data = data(None, None);
        assert_eq!(decide(&data, Utc::now()), RefreshDecision::Unknown);
    }

    #[test]
    fn test_future_expiry_is_fresh() {
        let data = data(Some(Duration::hours(1)), None);
        assert_eq!(decide(&data, Utc::now()), RefreshDecision::Fresh);
    }
}
