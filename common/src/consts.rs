/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::ops::RangeInclusive;
use std::time::Duration;

pub const PORT_RANGE: RangeInclusive<usize> = 1..=65535;

pub const QUEUE_PUSH: &str = "push";
pub const QUEUE_BUILD: &str = "build";
pub const QUEUE_DEPLOY: &str = "deploy";
pub const EXCHANGE_EDGES: &str = "edges";
pub const ROUTE_INVALIDATION: &str = "v1.invalidation";

pub const RAW_BUNDLE_FILE: &str = "raw-bundle.tar.gz";
pub const OPTIMIZED_BUNDLE_FILE: &str = "optimized-bundle.tar.gz";
pub const META_FILE: &str = "meta.json";
pub const JSENV_FILE: &str = "jsenv.js";
pub const BUNDLE_CONTENT_TYPE: &str = "application/gzip";

pub const MAX_CERT_UPLOAD_SIZE: u64 = 96 * 1024;
pub const MAX_WATERMARK_FILE_SIZE: u64 = 5_000_000;
pub const AES_KEY_SIZE: usize = 32;
pub const AES_IV_SIZE: usize = 16;
pub const ACME_RENEWAL_THRESHOLD_DAYS: i64 = 30;

pub const GITHUB_CONTENT_TIMEOUT: Duration = Duration::from_secs(2);
pub const GITHUB_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(10);
pub const OPTIMIZER_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const WEBROOT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(3 * 60);
pub const EDGE_TIMEOUT: Duration = Duration::from_secs(10);
pub const NACK_DELAY: Duration = Duration::from_secs(1);

pub const OPTIMIZER_BUILD_DIR: &str = "/tmp/optimizer/build";
pub const OPTIMIZER_ERROR_PREFIX: &str = "[Error] ";

pub const MSG_OPTIMIZER_TIMEOUT: &str = "Timed out on optimizing assets. This might happen due to too large asset files. We will continue without optimizing your assets.";
pub const MSG_OPTIMIZER_FAILED: &str = "Failed to optimize assets. We will continue without optimizing your assets.";
pub const MSG_UPLOAD_TIMEOUT: &str = "Timed out due to too many files";
pub const MSG_MISSING_PUBSTORM_JSON: &str = "Your GitHub repository does not contain a pubstorm.json file, aborting. Please check in the pubstorm.json file in the root of your repository.";
pub const MSG_INVALID_PUBSTORM_JSON: &str =
    "Your repository's pubstorm.json is in an invalid format, aborting.";

pub const WATERMARK_SCRIPT: &str = r#"<!-- PubStorm --><script type="text/javascript">(function(w,d,t){var s=d.createElement('div');s.style.cssText='position:fixed;display:block;bottom:20px;right:20px;opacity:.8;background-color:#1e4ca1;border-radius:10px';s.innerHTML='<a href="https://www.pubstorm.com/" target="_blank" style="display:block;padding:8px 16px;text-decoration:none;color:#febe10;font-family:Helvetica,Arial,sans-serif;font-size:16px">Powered by PubStorm</a>';d.body.appendChild(s);w.setTimeout(function(){s.style.display='none'},t*1000)}(window,document,30));</script><!-- END PubStorm -->"#;

pub const DEFAULT_MAX_DEPLOYS_KEPT: i32 = 10;
pub const DEFAULT_BRANCH: &str = "master";
pub const MAX_DOMAINS_PER_PROJECT: u64 = 5;
