/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Blob store key layout.

use super::consts::*;

pub fn deployment_prefix(prefix_id: &str) -> String {
    format!("deployments/{}", prefix_id)
}

pub fn raw_bundle_key(prefix_id: &str) -> String {
    format!("deployments/{}/{}", prefix_id, RAW_BUNDLE_FILE)
}

pub fn optimized_bundle_key(prefix_id: &str) -> String {
    format!("deployments/{}/{}", prefix_id, OPTIMIZED_BUNDLE_FILE)
}

pub fn webroot_key(prefix_id: &str, path: &str) -> String {
    format!("deployments/{}/webroot/{}", prefix_id, path)
}

pub fn domain_meta_key(domain: &str) -> String {
    format!("domains/{}/{}", domain, META_FILE)
}

pub fn cert_key(domain: &str) -> String {
    format!("certs/{}/ssl.crt", domain)
}

pub fn cert_private_key_key(domain: &str) -> String {
    format!("certs/{}/ssl.key", domain)
}
