//! # CRD Generator
//!
//! Prints the `Instance` and `AccessToken` CustomResourceDefinitions as a
//! multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/taskcluster.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use taskcluster_operator::crd::{AccessToken, Instance};

fn main() {
    for crd in [Instance::crd(), AccessToken::crd()] {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
