/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod acme_cert;
pub mod cert;
pub mod collab;
pub mod deployment;
pub mod domain;
pub mod oauth_client;
pub mod oauth_token;
pub mod project;
pub mod push;
pub mod raw_bundle;
pub mod repo;
pub mod user;
