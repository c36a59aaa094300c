use crate::client::*;
use crate::types::*;

impl Client {
    pub async fn agent_self(&self) -> Result<AgentSelf, QueryError> {
        let (_, agent) = self.query("/v1/agent/self", vec![], None).await?;
        Ok(agent)
    }

    pub async fn catalog_services(
        &self,
        qo: Option<&QueryOption>,
    ) -> Result<(QueryMeta, ServiceTags), QueryError> {
        self.query("/v1/catalog/services", vec![], qo).await
    }

    pub async fn health_service(
        &self,
        service: &str,
        passing_only: bool,
        qo: Option<&QueryOption>,
    ) -> Result<(QueryMeta, Vec<ServiceEntry>), QueryError> {
        let mut params = vec![];
        if passing_only {
            params.push(("passing", String::new()));
        }
        let path = format!("/v1/health/service/{}", path_segment(service));
        self.query(&path, params, qo).await
    }
}
