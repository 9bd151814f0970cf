//! CRD installation using server-side apply

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use netperf_common::crd::{Netperf, NETPERF_CRD_NAME};
use netperf_common::CONTROLLER_NAME;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn netperf_crds() -> Vec<CrdDef> {
    vec![CrdDef {
        name: NETPERF_CRD_NAME,
        crd: Netperf::crd(),
    }]
}

/// Install a set of CRDs using server-side apply
async fn install_crds(client: &Client, crds_to_install: Vec<CrdDef>) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    for def in crds_to_install {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    Ok(())
}

/// Ensure the Netperf CRD is installed and current
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    install_crds(client, netperf_crds()).await?;
    tracing::info!("Netperf CRD installed/updated");
    Ok(())
}

/// Netperf CRD rendered as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&Netperf::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))
}
