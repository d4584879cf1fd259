//! Connection startup and authentication.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use rand::Rng;

use crate::{
    Result,
    config::{AuthConfig, AuthMethod, ServerConfig},
    protocol::{FrontendMessage, StartupMessage, backend},
    stream::PgStream,
};

use super::{AuthError, scram::ScramServer};

/// What startup produced: an authenticated session, or an out-of-band
/// cancel request addressed at another session.
pub enum Startup {
    Session(SessionInfo),
    Cancel { process_id: i32, secret_key: i32 },
}

/// The authenticated identity and key data of a fresh session.
pub struct SessionInfo {
    pub user: String,
    pub database: Option<String>,
    pub process_id: i32,
    pub secret_key: i32,
}

/// Drive the probe/startup/authentication sequence. On success the
/// client has seen AuthenticationOk, the ParameterStatus set,
/// BackendKeyData, and ReadyForQuery('I').
///
/// The caller wraps this in the handshake deadline; expiry surfaces as
/// an authentication failure.
pub async fn authenticate(stream: &mut PgStream, config: &ServerConfig) -> Result<Startup> {
    // SSL / GSS probes may precede the real startup; each gets a one-byte
    // refusal (no TLS acceptor is wired into the core) and the client
    // retries in the clear
    let params = loop {
        match stream.read_startup().await? {
            StartupMessage::SslRequest | StartupMessage::GssEncRequest => {
                stream.send_ssl_reply(false).await?;
            }
            StartupMessage::CancelRequest { process_id, secret_key } => {
                return Ok(Startup::Cancel { process_id, secret_key });
            }
            StartupMessage::Startup { params } => break params,
        }
    };

    let mut user = None;
    let mut database = None;
    for (name, value) in params {
        match name.as_str() {
            "user" => user = Some(value),
            "database" => database = Some(value),
            // remaining run-time parameters are accepted and ignored
            _ => { }
        }
    }
    let Some(user) = user else {
        let err: crate::Error = AuthError::new("no PostgreSQL user name specified in startup packet").into();
        send_auth_failure(stream, &err).await?;
        return Err(err);
    };

    if let Err(err) = exchange_credentials(stream, &config.auth, &user).await {
        tracing::warn!(user = %user, error = %err, "authentication failed");
        send_auth_failure(stream, &err).await?;
        return Err(err);
    }
    tracing::info!(user = %user, "authentication succeeded");

    stream.send(backend::AuthenticationOk);

    for (name, value) in [
        ("server_version", config.server_version.as_str()),
        ("server_encoding", "UTF8"),
        ("client_encoding", "UTF8"),
        ("DateStyle", "ISO, MDY"),
        ("TimeZone", "UTC"),
        ("integer_datetimes", "on"),
        ("standard_conforming_strings", "on"),
        ("is_superuser", "off"),
    ] {
        stream.send(backend::ParameterStatus { name, value });
    }

    let (process_id, secret_key) = {
        let mut rng = rand::thread_rng();
        let process_id: i32 = rng.gen_range(1..i32::MAX);
        let secret_key: i32 = rng.r#gen();
        (process_id, secret_key)
    };
    stream.send(backend::BackendKeyData { process_id, secret_key });

    stream.send(backend::ReadyForQuery { tx_status: b'I' });
    stream.flush().await?;

    Ok(Startup::Session(SessionInfo {
        user,
        database,
        process_id,
        secret_key,
    }))
}

async fn exchange_credentials(
    stream: &mut PgStream,
    auth: &AuthConfig,
    user: &str,
) -> Result<()> {
    match auth.method {
        AuthMethod::Trust => Ok(()),
        AuthMethod::Cleartext => {
            stream.send(backend::AuthenticationCleartextPassword);
            stream.flush().await?;

            let password = match stream.read_message().await? {
                FrontendMessage::PasswordMessage(msg) => msg.as_password()?.to_string(),
                other => {
                    return Err(AuthError::new(format!(
                        "expected password message, got {}",
                        other.name(),
                    ))
                    .into());
                }
            };
            let expected = auth.password.as_deref().unwrap_or_default();
            if password != expected {
                return Err(AuthError::new(format!(
                    "password authentication failed for user \"{user}\"",
                ))
                .into());
            }
            Ok(())
        }
        AuthMethod::ScramSha256 => {
            stream.send(backend::AuthenticationSasl { mechanisms: &["SCRAM-SHA-256"] });
            stream.flush().await?;

            let (mechanism, initial) = match stream.read_message().await? {
                FrontendMessage::PasswordMessage(msg) => msg.as_sasl_initial()?,
                other => {
                    return Err(AuthError::new(format!(
                        "expected SASL initial response, got {}",
                        other.name(),
                    ))
                    .into());
                }
            };
            if mechanism != "SCRAM-SHA-256" {
                return Err(AuthError::new(format!(
                    "unsupported SASL mechanism {mechanism}",
                ))
                .into());
            }

            let mut scram = ScramServer::new(auth.password.clone().unwrap_or_default());
            let server_first = scram.client_first(&initial)?;
            stream.send(backend::AuthenticationSaslContinue { data: &server_first });
            stream.flush().await?;

            let final_data = match stream.read_message().await? {
                FrontendMessage::PasswordMessage(msg) => msg.body,
                other => {
                    return Err(AuthError::new(format!(
                        "expected SASL response, got {}",
                        other.name(),
                    ))
                    .into());
                }
            };
            let server_final = scram.client_final(&final_data)?;
            stream.send(backend::AuthenticationSaslFinal { data: &server_final });
            Ok(())
        }
    }
}

async fn send_auth_failure(stream: &mut PgStream, err: &crate::Error) -> Result<()> {
    let message = err.to_string();
    stream.send(backend::ErrorResponse::new(err.sqlstate(), &message));
    stream.flush().await
}
