use super::types::{
    ClusterRegistration, ClusterResource, Collection, LoginRequest, RegistrationToken, SettingValue,
    TokenRequest, TokenResponse,
};
use super::{
    select_latest_manifest, AuthError, ClusterStatus, ManagementApi, ManagementError, ManifestError,
    RegisterError, SessionToken,
};
use crate::config::ManagementConfig;
use crate::probes::https_base;
use async_trait::async_trait;
use canopy_common::{cluster_name, ClusterImportRecord};
use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const LOGIN_PATH: &str = "/v3-public/localProviders/local?action=login";
const TOKENS_PATH: &str = "/v3/tokens";
const CLUSTERS_PATH: &str = "/v1/provisioning.cattle.io.clusters";
const REGISTRATION_TOKENS_PATH: &str = "/v3/clusterregistrationtokens";
const TERMS_SETTINGS: [&str; 2] = ["eula-agreed", "first-login"];

/// reqwest-backed management API client
#[derive(Clone)]
pub struct ManagementClient {
    client: Client,
}

impl ManagementClient {
    pub fn new(accept_invalid_certs: bool, timeout: Duration) -> Result<Self, ManagementError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .timeout(timeout)
            .build()
            .map_err(|e| ManagementError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    pub fn from_config(config: &ManagementConfig) -> Result<Self, ManagementError> {
        Self::new(
            config.accept_invalid_certs,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(base_url: &str, path: &str) -> Result<Url, ManagementError> {
        let base = https_base(base_url);
        Url::parse(&base)
            .and_then(|u| u.join(path))
            .map_err(|_| ManagementError::InvalidUrl(base))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, ManagementError> {
        let body = self.send_raw(endpoint, request).await?;
        serde_json::from_str(&body).map_err(|e| ManagementError::Decode {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })
    }

    async fn send_raw(&self, endpoint: &str, request: RequestBuilder) -> Result<String, ManagementError> {
        debug!(endpoint, "Management API request");

        let response = request
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|source| ManagementError::Http {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| ManagementError::Http {
            endpoint: endpoint.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(ManagementError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

/// Six random lowercase letters
fn login_description() -> String {
    let mut rng = rand::thread_rng();
    (0..6).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

#[async_trait]
impl ManagementApi for ManagementClient {
    async fn authenticate(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<SessionToken, AuthError> {
        let login_url = Self::url(base_url, LOGIN_PATH).map_err(AuthError::Login)?;
        let login = LoginRequest {
            description: login_description(),
            response_type: "token",
            username,
            password,
        };

        let login: TokenResponse = self
            .send(LOGIN_PATH, self.client.post(login_url).json(&login))
            .await
            .map_err(AuthError::Login)?;
        if login.token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let tokens_url = Self::url(base_url, TOKENS_PATH).map_err(AuthError::TokenExchange)?;
        let api_token: TokenResponse = self
            .send(
                TOKENS_PATH,
                self.client
                    .post(tokens_url)
                    .header(AUTHORIZATION, format!("Bearer {}", login.token))
                    .json(&TokenRequest::default()),
            )
            .await
            .map_err(AuthError::TokenExchange)?;

        if api_token.token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        Ok(SessionToken::new(api_token.token))
    }

    async fn register_cluster(
        &self,
        base_url: &str,
        token: &SessionToken,
        ordinal: usize,
    ) -> Result<ClusterImportRecord, RegisterError> {
        let name = cluster_name(ordinal);
        let wrap = |source| RegisterError::Request {
            name: name.clone(),
            source,
        };

        let url = Self::url(base_url, CLUSTERS_PATH).map_err(wrap)?;
        self.send_raw(
            CLUSTERS_PATH,
            self.client
                .post(url)
                .header(AUTHORIZATION, token.bearer())
                .json(&ClusterRegistration::new(name.clone())),
        )
        .await
        .map_err(wrap)?;

        info!(ordinal, cluster = %name, "Registered import cluster");
        Ok(ClusterImportRecord::new(ordinal))
    }

    async fn fetch_manifest_url(&self, base_url: &str, token: &SessionToken) -> Result<String, ManifestError> {
        let url = Self::url(base_url, REGISTRATION_TOKENS_PATH)?;
        let tokens: Collection<RegistrationToken> = self
            .send(
                REGISTRATION_TOKENS_PATH,
                self.client.get(url).header(AUTHORIZATION, token.bearer()),
            )
            .await?;

        let latest = select_latest_manifest(&tokens.data).ok_or(ManifestError::NoTokens)?;
        if latest.manifest_url.is_empty() {
            return Err(ManifestError::EmptyManifestUrl);
        }

        debug!(created_ts = latest.created_ts, listed = tokens.data.len(), "Selected registration token");
        Ok(latest.manifest_url.clone())
    }

    async fn cluster_status(
        &self,
        base_url: &str,
        token: &SessionToken,
        name: &str,
    ) -> Result<ClusterStatus, ManagementError> {
        let url = Self::url(base_url, CLUSTERS_PATH)?;
        let clusters: Collection<ClusterResource> = self
            .send(CLUSTERS_PATH, self.client.get(url).header(AUTHORIZATION, token.bearer()))
            .await?;

        clusters
            .data
            .into_iter()
            .find(|c| c.metadata.name == name)
            .map(|c| c.status.unwrap_or_default())
            .ok_or_else(|| ManagementError::ClusterNotFound(name.to_string()))
    }

    async fn accept_terms(&self, base_url: &str, token: &SessionToken) -> Result<(), ManagementError> {
        for setting in TERMS_SETTINGS {
            let path = format!("/v3/settings/{}", setting);
            let url = Self::url(base_url, &path)?;
            self.send_raw(
                &path,
                self.client
                    .put(url)
                    .header(AUTHORIZATION, token.bearer())
                    .json(&SettingValue { value: "true" }),
            )
            .await?;
        }

        info!("Accepted terms and completed first login");
        Ok(())
    }
}
