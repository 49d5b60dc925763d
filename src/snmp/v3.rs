use snmp2::AsyncSession;
use snmp2::v3::{Auth, AuthProtocol, Cipher, Security};
use tracing::{debug, warn};

use super::session::UsmParams;
use crate::error::SessionError;

/// Разбирает имя протокола аутентификации. Пустая строка означает noAuth.
pub fn parse_auth_protocol(name: &str) -> Result<Option<AuthProtocol>, SessionError> {
    match name.to_lowercase().as_str() {
        "" => Ok(None),
        "md5" => Ok(Some(AuthProtocol::Md5)),
        "sha" | "sha1" => Ok(Some(AuthProtocol::Sha1)),
        "sha224" => Ok(Some(AuthProtocol::Sha224)),
        "sha256" => Ok(Some(AuthProtocol::Sha256)),
        "sha384" => Ok(Some(AuthProtocol::Sha384)),
        "sha512" => Ok(Some(AuthProtocol::Sha512)),
        _ => Err(SessionError::UnsupportedAuthProtocol(name.to_string())),
    }
}

/// Разбирает имя протокола шифрования. Пустая строка означает noPriv.
pub fn parse_privacy_protocol(name: &str) -> Result<Option<Cipher>, SessionError> {
    match name.to_lowercase().as_str() {
        "" => Ok(None),
        "des" => Ok(Some(Cipher::Des)),
        "aes" | "aes128" => Ok(Some(Cipher::Aes128)),
        "aes192" => Ok(Some(Cipher::Aes192)),
        "aes256" => Ok(Some(Cipher::Aes256)),
        _ => Err(SessionError::UnsupportedPrivacyProtocol(name.to_string())),
    }
}

/// Собирает параметры безопасности USM.
pub fn build_security(params: &UsmParams) -> Result<Security, SessionError> {
    let auth_protocol = parse_auth_protocol(&params.auth_protocol)?;
    let cipher = parse_privacy_protocol(&params.priv_protocol)?;

    let mut security = Security::new(params.user.as_bytes(), params.auth_key.as_bytes());
    security = match (auth_protocol, cipher) {
        (None, _) => security.with_auth(Auth::NoAuthNoPriv),
        (Some(protocol), None) => security
            .with_auth_protocol(protocol)
            .with_auth(Auth::AuthNoPriv),
        (Some(protocol), Some(cipher)) => security
            .with_auth_protocol(protocol)
            .with_auth(Auth::AuthPriv {
                cipher,
                privacy_password: params.priv_key.as_bytes().to_vec(),
            }),
    };

    Ok(security)
}

/// Открывает SNMPv3 сессию и выполняет обнаружение engine ID.
pub async fn open_usm_session(
    target: &str,
    params: &UsmParams,
) -> Result<AsyncSession, SessionError> {
    if !params.context_name.is_empty() || !params.context_engine_id.is_empty() {
        warn!(
            target = target,
            context_name = %params.context_name,
            "context name/engine id не поддерживаются транспортом и будут проигнорированы"
        );
    }

    let security = build_security(params)?;
    debug!(target = target, user = %params.user, "открываем SNMPv3 сессию");

    let mut session = AsyncSession::new_v3(target, 2, security)
        .await
        .map_err(|e| SessionError::Transport(format!("Не удалось создать SNMPv3 сессию: {}", e)))?;
    session
        .init()
        .await
        .map_err(|e| SessionError::Transport(format!("SNMPv3 init не удался: {}", e)))?;

    Ok(session)
}
