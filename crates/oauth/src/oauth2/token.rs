//! Token endpoint requests and reply parsing
//!
//! Both the authorization-code exchange and the refresh POST a form body to
//! the token endpoint and get the same JSON shape back.

use common::Secret;
use serde::Deserialize;
use transport::{HttpReply, HttpRequest, form_post};

use crate::codec::{ParamMap, ParamMode, serialize};
use crate::constants::MAX_EXPIRES_IN;
use crate::error::{AuthError, Result};

/// Token endpoint JSON. Every field is optional so an `error` reply parses.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// A successful token endpoint reply.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: Secret<String>,
    /// Present when the provider issues (or rotates) the refresh token
    pub refresh_token: Option<Secret<String>>,
    /// Seconds until the access token expires
    pub expires_in: i64,
}

fn form(pairs: &[(&str, &str)]) -> String {
    let params: ParamMap = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    serialize(&params, ParamMode::Body)
}

/// `code, client_id, client_secret, redirect_uri, grant_type=authorization_code`
/// plus `code_verifier` when PKCE is in use.
pub fn code_exchange_request(
    token_endpoint: &str,
    client_id: &str,
    client_secret: &Secret<String>,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> HttpRequest {
    let mut pairs = vec![
        ("code", code),
        ("client_id", client_id),
        ("client_secret", client_secret.expose().as_str()),
        ("redirect_uri", redirect_uri),
        ("grant_type", "authorization_code"),
    ];
    if let Some(verifier) = code_verifier {
        pairs.push(("code_verifier", verifier));
    }
    form_post(token_endpoint, form(&pairs))
}

/// `client_id, client_secret, refresh_token, grant_type=refresh_token`
pub fn refresh_request(
    token_endpoint: &str,
    client_id: &str,
    client_secret: &Secret<String>,
    refresh_token: &Secret<String>,
) -> HttpRequest {
    form_post(
        token_endpoint,
        form(&[
            ("client_id", client_id),
            ("client_secret", client_secret.expose().as_str()),
            ("refresh_token", refresh_token.expose().as_str()),
            ("grant_type", "refresh_token"),
        ]),
    )
}

/// Interpret a token endpoint reply.
///
/// A JSON `error` field is a server error whatever the status; otherwise a
/// non-200 status, empty body, unparseable JSON, or missing field is a
/// protocol error.
pub fn parse_token_reply(reply: &HttpReply) -> Result<TokenGrant> {
    if reply.body.trim().is_empty() {
        return Err(AuthError::protocol(format!(
            "token endpoint returned status {} with an empty body",
            reply.status
        )));
    }

    let parsed = serde_json::from_str::<TokenResponse>(&reply.body);
    if let Ok(TokenResponse {
        error: Some(error),
        error_description,
        ..
    }) = &parsed
    {
        let detail = match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        };
        return Err(AuthError::server(detail));
    }

    if reply.status != 200 {
        return Err(AuthError::protocol(format!(
            "token endpoint returned status {}",
            reply.status
        )));
    }

    let response =
        parsed.map_err(|e| AuthError::protocol(format!("invalid token response: {e}")))?;
    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::protocol("token response lacks access_token"))?;
    let expires_in = response
        .expires_in
        .ok_or_else(|| AuthError::protocol("token response lacks expires_in"))?;
    if !(0..=MAX_EXPIRES_IN).contains(&expires_in) {
        return Err(AuthError::protocol(format!(
            "token response expires_in {expires_in} out of range"
        )));
    }

    Ok(TokenGrant {
        access_token: Secret::new(access_token),
        refresh_token: response
            .refresh_token
            .filter(|t| !t.is_empty())
            .map(Secret::new),
        expires_in,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_query;
    use crate::error::ErrorKind;

    #[test]
    fn code_exchange_body_carries_all_fields() {
        let request = code_exchange_request(
            "https://provider.test/token",
            "client-1",
            &Secret::from("s3cret"),
            "C/1",
            "http://127.0.0.1:4000/oauth2",
            None,
        );
        assert_eq!(request.method, reqwest::Method::POST);
        assert_eq!(request.content_type.as_deref(), Some(transport::FORM_CONTENT_TYPE));

        let body = parse_query(&request.body);
        assert_eq!(body["code"], "C/1");
        assert_eq!(body["client_id"], "client-1");
        assert_eq!(body["client_secret"], "s3cret");
        assert_eq!(body["redirect_uri"], "http://127.0.0.1:4000/oauth2");
        assert_eq!(body["grant_type"], "authorization_code");
        assert!(!body.contains_key("code_verifier"));
        assert!(request.body.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A4000%2Foauth2"));
    }

    #[test]
    fn code_exchange_adds_pkce_verifier() {
        let request = code_exchange_request(
            "https://provider.test/token",
            "client-1",
            &Secret::from("s3cret"),
            "C",
            "http://127.0.0.1:4000/oauth2",
            Some("verifier-xyz"),
        );
        assert_eq!(parse_query(&request.body)["code_verifier"], "verifier-xyz");
    }

    #[test]
    fn refresh_body_carries_all_fields() {
        let request = refresh_request(
            "https://provider.test/token",
            "client-1",
            &Secret::from("s3cret"),
            &Secret::from("rt_1"),
        );
        let body = parse_query(&request.body);
        assert_eq!(body.len(), 4);
        assert_eq!(body["refresh_token"], "rt_1");
        assert_eq!(body["grant_type"], "refresh_token");
    }

    #[test]
    fn parses_successful_reply() {
        let grant = parse_token_reply(&HttpReply::new(
            200,
            r#"{"access_token":"at_1","refresh_token":"rt_1","expires_in":3600,"token_type":"bearer"}"#,
        ))
        .unwrap();
        assert_eq!(grant.access_token.expose(), "at_1");
        assert_eq!(grant.refresh_token.unwrap().expose(), "rt_1");
        assert_eq!(grant.expires_in, 3600);
    }

    #[test]
    fn refresh_reply_may_omit_refresh_token() {
        let grant =
            parse_token_reply(&HttpReply::new(200, r#"{"access_token":"at_2","expires_in":60}"#))
                .unwrap();
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn error_field_is_server_error_even_on_400() {
        let err = parse_token_reply(&HttpReply::new(
            400,
            r#"{"error":"invalid_grant","error_description":"refresh token revoked"}"#,
        ))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.detail, "invalid_grant: refresh token revoked");
    }

    #[test]
    fn malformed_replies_are_protocol_errors() {
        for reply in [
            HttpReply::new(500, "upstream exploded"),
            HttpReply::new(200, ""),
            HttpReply::new(200, "not json"),
            HttpReply::new(200, r#"{"refresh_token":"rt","expires_in":1}"#),
            HttpReply::new(200, r#"{"access_token":"at"}"#),
            HttpReply::new(200, r#"{"access_token":"at","expires_in":-1}"#),
            HttpReply::new(
                200,
                r#"{"access_token":"at","expires_in":9223372036854775807}"#,
            ),
        ] {
            let err = parse_token_reply(&reply).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Protocol, "reply: {reply:?}");
        }
    }

    #[test]
    fn expires_in_upper_bound_is_inclusive() {
        let body = format!(r#"{{"access_token":"at","expires_in":{MAX_EXPIRES_IN}}}"#);
        let grant = parse_token_reply(&HttpReply::new(200, body)).unwrap();
        assert_eq!(grant.expires_in, MAX_EXPIRES_IN);

        let body = format!(r#"{{"access_token":"at","expires_in":{}}}"#, MAX_EXPIRES_IN + 1);
        let err = parse_token_reply(&HttpReply::new(200, body)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }
}
