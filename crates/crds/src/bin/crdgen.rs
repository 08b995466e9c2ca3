//! Prints the KfCluster CustomResourceDefinition as YAML.

use crds::KfCluster;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&KfCluster::crd())?);
    Ok(())
}
