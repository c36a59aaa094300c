//! Service set to Envoy cluster and route snapshots.
//!
//! Both snapshots list services in name order, so equal service sets always
//! produce equal responses.

use crate::config::{ClusterConfig, HealthCheckConfig, RouteConfig};
use crate::envoy::*;
use crate::types::ServiceTags;

const CATCH_ALL_PREFIX: &str = "/";

pub fn cluster(name: &str, cfg: &ClusterConfig) -> Cluster {
    Cluster {
        name: name.to_string(),
        kind: "sds".to_string(),
        connect_timeout_ms: cfg.connect_timeout_in_ms,
        lb_type: cfg.lb_type.clone(),
        service_name: name.to_string(),
        health_check: cfg.health_check.as_ref().map(health_check),
        outlier_detection: cfg.outlier_detection.then(OutlierDetection::default),
    }
}

fn health_check(cfg: &HealthCheckConfig) -> HealthCheck {
    HealthCheck {
        kind: cfg.kind.clone(),
        timeout_ms: cfg.timeout_in_ms,
        interval_ms: cfg.interval_in_ms,
        unhealthy_threshold: cfg.unhealthy_threshold,
        healthy_threshold: cfg.healthy_threshold,
        path: None,
        interval_jitter_ms: None,
        service_name: None,
        send: vec![],
        receive: vec![],
    }
}

pub fn build_clusters(services: &ServiceTags, cfg: &ClusterConfig) -> ClusterDiscoveryResponse {
    ClusterDiscoveryResponse {
        clusters: services.keys().map(|name| cluster(name, cfg)).collect(),
    }
}

pub fn domains(name: &str, domain: &str, cfg: &RouteConfig) -> Vec<String> {
    let mut domains = vec![format!("{}.service.{}", name, domain)];
    if cfg.wildcard_subdomains {
        domains.push(format!("*.{}.service.{}", name, domain));
    }
    domains
}

/// Virtual host of `name`. Prefix rules targeting it are applied in table
/// order, each only while its cluster is part of `services`.
pub fn virtual_host(
    name: &str,
    services: &ServiceTags,
    domain: &str,
    cfg: &RouteConfig,
) -> VirtualHost {
    let retry_policy = RetryPolicy {
        retry_on: cfg.retry_on.clone(),
        num_retries: cfg.num_retries,
        per_try_timeout_ms: None,
    };
    let route = |prefix: &str, cluster: &str| Route {
        prefix: prefix.to_string(),
        cluster: cluster.to_string(),
        timeout_ms: cfg.timeout_in_ms,
        retry_policy: Some(retry_policy.clone()),
    };

    let mut routes: Vec<Route> = cfg
        .prefix_rules
        .iter()
        .filter(|rule| rule.virtual_host == name && services.contains_key(&rule.cluster))
        .flat_map(|rule| rule.prefixes.iter().map(move |p| (p.as_str(), rule.cluster.as_str())))
        .map(|(prefix, cluster)| route(prefix, cluster))
        .collect();
    routes.push(route(CATCH_ALL_PREFIX, name));

    VirtualHost {
        name: name.to_string(),
        domains: domains(name, domain, cfg),
        routes,
    }
}

pub fn build_routes(
    services: &ServiceTags,
    domain: &str,
    cfg: &RouteConfig,
) -> RouteDiscoveryResponse {
    RouteDiscoveryResponse {
        validate_clusters: false,
        virtual_hosts: services
            .keys()
            .map(|name| virtual_host(name, services, domain, cfg))
            .collect(),
    }
}
