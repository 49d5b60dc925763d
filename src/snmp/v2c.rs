use snmp2::AsyncSession;
use tracing::debug;

use super::session::SnmpVersion;
use crate::error::SessionError;

/// Открывает community-сессию (SNMPv1 или SNMPv2c).
pub async fn open_community_session(
    target: &str,
    community: &[u8],
    version: SnmpVersion,
) -> Result<AsyncSession, SessionError> {
    debug!(target = target, version = %version, "открываем community сессию");

    let session = match version {
        SnmpVersion::V1 => AsyncSession::new_v1(target, community, 2).await,
        SnmpVersion::V2c => AsyncSession::new_v2c(target, community, 2).await,
        SnmpVersion::V3 => return Err(SessionError::NoAuthentication),
    };

    session.map_err(|e| SessionError::Transport(format!("Не удалось создать SNMP сессию: {}", e)))
}
