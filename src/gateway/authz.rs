//! Channel authorization guard.

use crate::auth::verifier::Identity;
use crate::error::{JoinDenied, StoreError};
use crate::store::{Channel, ChannelStore};

/// Confirm that a channel exists and belongs to the requesting identity.
///
/// Runs a fresh store lookup on every call — ownership can change out-of-band
/// between joins, so results are never cached. "Not found" and "not yours"
/// surface as the same denial.
pub async fn authorize(
    store: &dyn ChannelStore,
    identity: &Identity,
    channel_id: &str,
) -> Result<Channel, JoinDenied> {
    let channel = match store.get_channel(channel_id).await {
        Ok(channel) => channel,
        Err(StoreError::NotFound) => return Err(JoinDenied::NotAuthorized),
        Err(StoreError::Unavailable) => {
            tracing::error!(%channel_id, "channel lookup failed; denying join");
            return Err(JoinDenied::StoreUnavailable);
        }
    };

    if channel.owner_user_id != identity.user_id
        || channel.organization_id != identity.organization_id
    {
        return Err(JoinDenied::NotAuthorized);
    }

    Ok(channel)
}
