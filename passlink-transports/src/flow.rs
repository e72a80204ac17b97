//! WebAuthn registration and authentication over an open [`CtapConnection`], picking CTAP2 or
//! U2F depending on what the authenticator and the request need.
use std::time::Duration;

use coset::iana;
use passlink_types::{
    cose::CoseKey,
    crypto::sha256,
    ctap2::{
        client_pin::PIN_PROTOCOL_ONE, get_assertion, make_credential, Aaguid, AttestationObject,
        AttestedCredentialData, AuthenticatorData, Ctap2Error,
    },
    u2f::{
        AuthenticationParameter, AuthenticationRequest, RegisterRequest, ResponseStatusWords,
    },
    webauthn::{
        AttestationConveyancePreference, AuthenticatorAssertionResponse,
        AuthenticatorAttestationResponse, AuthenticatorResponse, ClientDataType,
        CollectedClientData, PublicKeyCredentialCreationOptions, PublicKeyCredentialDescriptor,
        PublicKeyCredentialRequestOptions, RequestOptions, ResidentKeyRequirement,
        UserVerificationRequirement,
    },
    DecodeError,
};
use zeroize::Zeroizing;

use crate::{
    pin::{get_pin_token, pin_auth},
    CallerIdentity, Capabilities, ConnectionError, CtapConnection, CtapConnectionExt,
    TransportConfig, TransportError,
};

/// Client data sent in place of the JSON when the caller supplied its own hash.
const INVALID_CLIENT_DATA: &[u8] = b"<invalid>";

/// Run `options` over `connection`.
pub async fn run(
    connection: &mut dyn CtapConnection,
    options: &RequestOptions,
    caller: &CallerIdentity,
    config: &TransportConfig,
) -> Result<AuthenticatorResponse, TransportError> {
    match options {
        RequestOptions::Register(options) => register(connection, options, caller, config)
            .await
            .map(AuthenticatorResponse::Attestation),
        RequestOptions::Sign(options) => sign(connection, options, caller, config)
            .await
            .map(AuthenticatorResponse::Assertion),
    }
}

fn client_data(
    ty: ClientDataType,
    challenge: &[u8],
    caller: &CallerIdentity,
) -> (Vec<u8>, [u8; 32]) {
    match caller.client_data_hash {
        Some(hash) => (INVALID_CLIENT_DATA.to_vec(), hash),
        None => CollectedClientData::new(
            ty,
            challenge,
            caller.package.as_deref(),
            caller.origin.as_deref(),
        )
        .to_json_and_hash(),
    }
}

/// How the user gets verified on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Verification {
    /// User verification is wanted
    required: bool,
    /// It has to happen through the client PIN, the authenticator has no built-in method
    requires_pin: bool,
}

impl Verification {
    fn resolve(capabilities: Capabilities, requirement: UserVerificationRequirement) -> Self {
        let required = match requirement {
            UserVerificationRequirement::Required => true,
            UserVerificationRequirement::Discouraged => false,
            UserVerificationRequirement::Preferred => capabilities
                .intersects(Capabilities::CLIENT_PIN | Capabilities::USER_VERIFICATION),
        };
        Self {
            required,
            requires_pin: required
                && !capabilities.contains(Capabilities::USER_VERIFICATION)
                && capabilities.contains(Capabilities::CLIENT_PIN),
        }
    }

    /// Obtain a PIN token when one is needed. A caller that already asked the user and got no PIN
    /// continues without one and lets the authenticator decide.
    async fn pin_token(
        &self,
        connection: &mut dyn CtapConnection,
        caller: &CallerIdentity,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, TransportError> {
        if !self.requires_pin {
            return Ok(None);
        }
        match &caller.pin {
            Some(pin) => get_pin_token(connection, pin)
                .await
                .map(Some)
                .map_err(ctap2_error),
            None if !caller.pin_requested => Err(TransportError::MissingPin),
            None => Ok(None),
        }
    }
}

/// Map the PIN related CTAP2 statuses to what the caller can act on.
fn ctap2_error(e: ConnectionError) -> TransportError {
    match e.ctap2_error() {
        Some(Ctap2Error::PinInvalid) => TransportError::WrongPin,
        Some(Ctap2Error::PuatRequired) => TransportError::MissingPin,
        _ => e.into(),
    }
}

fn timeout(timeout_ms: Option<u32>, config: &TransportConfig) -> Duration {
    timeout_ms
        .map(|ms| Duration::from_millis(u64::from(ms)))
        .unwrap_or(config.ctap2_timeout)
}

fn pin_parameters(
    token: Option<&Zeroizing<Vec<u8>>>,
    client_data_hash: &[u8; 32],
) -> (Option<[u8; 16]>, Option<u8>) {
    match token {
        Some(token) => (
            Some(pin_auth(token, client_data_hash)),
            Some(PIN_PROTOCOL_ONE),
        ),
        None => (None, None),
    }
}

/// Whether the U2F check-only probe says the authenticator holds `credential` for `application`.
async fn ctap1_has_credential(
    connection: &mut dyn CtapConnection,
    challenge: [u8; 32],
    application: [u8; 32],
    credential: &PublicKeyCredentialDescriptor,
) -> bool {
    let probe = AuthenticationRequest {
        parameter: AuthenticationParameter::CheckOnly,
        challenge,
        application,
        key_handle: credential.id.to_vec(),
    };
    match connection.run_ctap1(&probe).await {
        // A token never signs a check-only request, anything else is a no.
        Ok(_) => true,
        Err(e) => e.is_status_word(ResponseStatusWords::ConditionsNotSatisfied),
    }
}

/// Repeat a U2F request while the token waits for a touch.
macro_rules! retry_for_presence {
    ($config:expr, $request:expr) => {
        loop {
            match $request.await {
                Err(e) if e.is_status_word(ResponseStatusWords::ConditionsNotSatisfied) => {
                    log::debug!("waiting for user presence");
                    tokio::time::sleep($config.user_presence_retry_delay).await;
                }
                other => break other,
            }
        }
    };
}

/// Create a credential.
pub async fn register(
    connection: &mut dyn CtapConnection,
    options: &PublicKeyCredentialCreationOptions,
    caller: &CallerIdentity,
    config: &TransportConfig,
) -> Result<AuthenticatorAttestationResponse, TransportError> {
    let (client_data_json, client_data_hash) =
        client_data(ClientDataType::Create, &options.challenge, caller);
    let capabilities = connection.capabilities();
    let selection = options.authenticator_selection.clone().unwrap_or_default();

    let require_resident_key = match selection.resident_key {
        Some(ResidentKeyRequirement::Required) => true,
        Some(ResidentKeyRequirement::Preferred) => {
            capabilities.contains(Capabilities::RESIDENT_KEY)
        }
        Some(ResidentKeyRequirement::Discouraged) => false,
        None => selection.require_resident_key,
    };
    let verification = Verification::resolve(capabilities, selection.user_verification);

    let use_ctap2 = capabilities.contains(Capabilities::CTAP2)
        && (require_resident_key
            || verification.requires_pin
            || !capabilities.contains(Capabilities::CTAP1));

    let (attestation_object, key_handle) = if use_ctap2 {
        ctap2_register(
            connection,
            options,
            caller,
            config,
            client_data_hash,
            require_resident_key,
            verification,
        )
        .await?
    } else if capabilities.contains(Capabilities::CTAP1) {
        ctap1_register(
            connection,
            options,
            config,
            client_data_hash,
            require_resident_key,
        )
        .await?
    } else {
        return Err(ConnectionError::Unsupported("CTAP1 or CTAP2").into());
    };

    Ok(AuthenticatorAttestationResponse {
        key_handle: key_handle.into(),
        client_data_json: client_data_json.into(),
        attestation_object: attestation_object.to_vec()?.into(),
        transports: connection.transports(),
    })
}

async fn ctap2_register(
    connection: &mut dyn CtapConnection,
    options: &PublicKeyCredentialCreationOptions,
    caller: &CallerIdentity,
    config: &TransportConfig,
    client_data_hash: [u8; 32],
    require_resident_key: bool,
    verification: Verification,
) -> Result<(AttestationObject, Vec<u8>), TransportError> {
    let token = verification.pin_token(connection, caller).await?;
    let (pin_auth, pin_protocol) = pin_parameters(token.as_ref(), &client_data_hash);

    let request = make_credential::Request {
        client_data_hash,
        rp: options.into(),
        user: (&options.user).into(),
        pub_key_cred_params: options.algorithms(),
        exclude_list: options.excluded().cloned().collect(),
        extensions: options
            .extensions
            .as_ref()
            .and_then(|e| e.to_cbor("appidExclude")),
        options: make_credential::Options {
            rk: require_resident_key,
            uv: verification.required && token.is_none(),
        },
        pin_auth,
        pin_protocol,
        timeout: Some(timeout(options.timeout, config)),
    };
    let attestation_object = connection.run_ctap2(&request).await.map_err(ctap2_error)?;
    let key_handle = attestation_object
        .authenticator_data()?
        .attested_credential_data
        .map(|acd| acd.credential_id().to_vec())
        .ok_or_else(|| DecodeError::MissingKey("attestedCredentialData".into()))?;
    Ok((attestation_object, key_handle))
}

async fn ctap1_register(
    connection: &mut dyn CtapConnection,
    options: &PublicKeyCredentialCreationOptions,
    config: &TransportConfig,
    client_data_hash: [u8; 32],
    require_resident_key: bool,
) -> Result<(AttestationObject, Vec<u8>), TransportError> {
    if !options.pub_key_cred_params.is_empty()
        && options
            .pub_key_cred_params
            .iter()
            .all(|p| p.alg != iana::Algorithm::ES256)
    {
        return Err(TransportError::UnsupportedRequest(
            "U2F only creates ES256 credentials",
        ));
    }
    if require_resident_key {
        return Err(TransportError::UnsupportedRequest(
            "U2F cannot create discoverable credentials",
        ));
    }

    let rp_id_hash = sha256(options.rp_id().as_bytes());
    let app_id_hash = options
        .extensions
        .as_ref()
        .and_then(|e| e.appid.as_deref())
        .map(|appid| sha256(appid.as_bytes()));

    let mut excluded_present = false;
    for credential in options.excluded() {
        if ctap1_has_credential(connection, client_data_hash, rp_id_hash, credential).await {
            excluded_present = true;
            break;
        }
        if let Some(app_id_hash) = app_id_hash {
            if ctap1_has_credential(connection, client_data_hash, app_id_hash, credential).await {
                excluded_present = true;
                break;
            }
        }
    }

    let request = RegisterRequest {
        challenge: client_data_hash,
        application: rp_id_hash,
    };
    let response = retry_for_presence!(config, connection.run_ctap1(&request))?;
    if excluded_present {
        log::info!("an excluded credential is registered on the authenticator");
        return Err(TransportError::NotAllowed);
    }

    let key = CoseKey::es256(response.public_key.x, response.public_key.y);
    let acd = AttestedCredentialData::with_cose_key(
        Aaguid::new_empty(),
        response.key_handle.clone(),
        &key,
    )?;
    let auth_data =
        AuthenticatorData::new(rp_id_hash, true, false, 0).with_attested_credential_data(acd);
    let attestation_object = match options.attestation {
        AttestationConveyancePreference::None => AttestationObject::none(&auth_data)?,
        _ => AttestationObject::fido_u2f(
            &auth_data,
            response.signature,
            response.attestation_certificate,
        )?,
    };
    Ok((attestation_object, response.key_handle))
}

/// Produce an assertion.
pub async fn sign(
    connection: &mut dyn CtapConnection,
    options: &PublicKeyCredentialRequestOptions,
    caller: &CallerIdentity,
    config: &TransportConfig,
) -> Result<AuthenticatorAssertionResponse, TransportError> {
    let (client_data_json, client_data_hash) =
        client_data(ClientDataType::Get, &options.challenge, caller);
    let capabilities = connection.capabilities();

    let assertion = if capabilities.contains(Capabilities::CTAP2) {
        match ctap2_sign(connection, options, caller, config, client_data_hash).await {
            Err(TransportError::Connection(e))
                if e.ctap2_error() == Some(Ctap2Error::NoCredentials)
                    && capabilities.contains(Capabilities::CTAP1 | Capabilities::CLIENT_PIN)
                    && options.allowed().next().is_some()
                    && options.user_verification != UserVerificationRequirement::Required =>
            {
                log::warn!("no CTAP2 credential found, falling back to U2F");
                match ctap1_sign(connection, options, config, client_data_hash).await {
                    Ok(assertion) => assertion,
                    Err(fallback) => {
                        log::debug!("U2F fallback failed: {fallback}");
                        return Err(TransportError::Connection(e));
                    }
                }
            }
            other => other?,
        }
    } else if capabilities.contains(Capabilities::CTAP1) {
        ctap1_sign(connection, options, config, client_data_hash).await?
    } else {
        return Err(ConnectionError::Unsupported("CTAP1 or CTAP2").into());
    };

    Ok(AuthenticatorAssertionResponse {
        key_handle: assertion.credential_id.into(),
        client_data_json: client_data_json.into(),
        authenticator_data: assertion.auth_data.into(),
        signature: assertion.signature.into(),
        user_handle: assertion.user_handle.map(Into::into),
    })
}

struct Assertion {
    credential_id: Vec<u8>,
    auth_data: Vec<u8>,
    signature: Vec<u8>,
    user_handle: Option<Vec<u8>>,
}

async fn ctap2_sign(
    connection: &mut dyn CtapConnection,
    options: &PublicKeyCredentialRequestOptions,
    caller: &CallerIdentity,
    config: &TransportConfig,
    client_data_hash: [u8; 32],
) -> Result<Assertion, TransportError> {
    let verification = Verification::resolve(connection.capabilities(), options.user_verification);
    let token = verification.pin_token(connection, caller).await?;
    let (pin_auth, pin_protocol) = pin_parameters(token.as_ref(), &client_data_hash);

    let request = get_assertion::Request {
        rp_id: options.rp_id.clone(),
        client_data_hash,
        allow_list: options.allowed().cloned().collect(),
        extensions: options.extensions.as_ref().and_then(|e| e.to_cbor("appid")),
        options: get_assertion::Options {
            up: true,
            uv: verification.required && token.is_none(),
        },
        pin_auth,
        pin_protocol,
        timeout: Some(timeout(options.timeout, config)),
    };
    let response = connection.run_ctap2(&request).await.map_err(ctap2_error)?;
    let credential_id = response
        .credential_id(&request.allow_list)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| DecodeError::MissingKey("credential".into()))?;
    Ok(Assertion {
        credential_id,
        auth_data: response.auth_data,
        signature: response.signature,
        user_handle: response.user_id,
    })
}

async fn ctap1_sign(
    connection: &mut dyn CtapConnection,
    options: &PublicKeyCredentialRequestOptions,
    config: &TransportConfig,
    client_data_hash: [u8; 32],
) -> Result<Assertion, TransportError> {
    let rp_id_hash = sha256(options.rp_id.as_bytes());
    match ctap1_sign_for(connection, options, config, client_data_hash, rp_id_hash).await {
        Ok(assertion) => Ok(assertion),
        Err(e) => {
            if let Some(appid) = options.appid() {
                log::debug!("retrying U2F with the AppID after: {e}");
                let app_id_hash = sha256(appid.as_bytes());
                if let Ok(assertion) =
                    ctap1_sign_for(connection, options, config, client_data_hash, app_id_hash).await
                {
                    return Ok(assertion);
                }
            }
            Err(e)
        }
    }
}

async fn ctap1_sign_for(
    connection: &mut dyn CtapConnection,
    options: &PublicKeyCredentialRequestOptions,
    config: &TransportConfig,
    client_data_hash: [u8; 32],
    application: [u8; 32],
) -> Result<Assertion, TransportError> {
    let mut chosen = None;
    for credential in options.allowed() {
        if ctap1_has_credential(connection, client_data_hash, application, credential).await {
            chosen = Some(credential);
            break;
        }
    }
    let credential = chosen
        .or_else(|| options.allowed().next())
        .ok_or(TransportError::UnsupportedRequest(
            "U2F needs a list of allowed credentials",
        ))?;

    let request = AuthenticationRequest {
        parameter: AuthenticationParameter::EnforceUserPresence,
        challenge: client_data_hash,
        application,
        key_handle: credential.id.to_vec(),
    };
    let response = retry_for_presence!(config, connection.run_ctap1(&request))?;
    let auth_data =
        AuthenticatorData::new(application, response.user_present(), false, response.counter);
    Ok(Assertion {
        credential_id: credential.id.to_vec(),
        auth_data: auth_data.to_vec()?,
        signature: response.signature,
        user_handle: None,
    })
}
