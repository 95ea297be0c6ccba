// Copyright [2026] [Lyrebird Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Lyrebird Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared server state: services, method descriptions with compiled
//! schemas, and the stub store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use uuid::Uuid;

use lyrebird_core::error::{LyrebirdError, LyrebirdResult};
use lyrebird_core::method::{ConnectionType, MethodDescription, Service};
use lyrebird_core::schema::MethodSchema;
use lyrebird_core::stub::{Stub, StubSlot, StubStore};

use crate::telemetry::Telemetry;

/// Where calls to a method go.
#[derive(Debug, Clone)]
pub enum MethodTarget {
    /// Serve from the stub store.
    Stubbed(MethodSchema),
    /// Try stubs when codecs were supplied, otherwise forward the raw
    /// frame to the upstream at `url`.
    Proxy {
        url: String,
        schema: Option<MethodSchema>,
    },
}

/// A registered method description plus its compiled schema.
#[derive(Debug)]
pub struct MethodEntry {
    pub method: MethodDescription,
    pub target: MethodTarget,
}

impl MethodEntry {
    pub fn schema(&self) -> Option<&MethodSchema> {
        match &self.target {
            MethodTarget::Stubbed(schema) => Some(schema),
            MethodTarget::Proxy { schema, .. } => schema.as_ref(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    services: HashMap<String, Service>,
    methods: HashMap<String, Arc<MethodEntry>>,
    by_path: HashMap<String, Arc<MethodEntry>>,
}

/// Registry of everything the mock server impersonates.
#[derive(Default)]
pub struct MockRegistry {
    inner: Mutex<RegistryInner>,
    pub stubs: StubStore,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a service. Re-posting an existing name
    /// updates the suffix, so setup scripts stay idempotent.
    pub fn upsert_service(&self, service: Service) -> Service {
        let mut inner = self.inner.lock();
        inner.services.insert(service.name.clone(), service.clone());
        service
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.inner.lock().services.get(name).cloned()
    }

    /// Registers a method description, or replaces the one already
    /// stored under the same id.
    ///
    /// A description that stubs reference is frozen except for its
    /// `proxyUrl`; the method name must not collide with a different
    /// description.
    pub fn register_method(&self, method: MethodDescription) -> LyrebirdResult<Arc<MethodEntry>> {
        method.validate()?;
        let target = build_target(&method)?;

        let mut inner = self.inner.lock();
        if !inner.services.contains_key(&method.service) {
            return Err(LyrebirdError::ServiceNotFound(method.service.clone()));
        }
        if let Some(holder) = inner.by_path.get(&method.grpc_path()) {
            if holder.method.id != method.id {
                return Err(LyrebirdError::MethodNameTaken(method.method_name.clone()));
            }
        }
        if let Some(existing) = inner.methods.get(&method.id) {
            if self.stubs.has_stubs_for(&method.id)
                && !only_proxy_url_differs(&existing.method, &method)
            {
                return Err(LyrebirdError::MethodInUse(method.id.clone()));
            }
        }

        let entry = Arc::new(MethodEntry { method, target });
        if let Some(old) = inner
            .methods
            .insert(entry.method.id.clone(), entry.clone())
        {
            inner.by_path.remove(&old.method.grpc_path());
        }
        inner.by_path.insert(entry.method.grpc_path(), entry.clone());
        Ok(entry)
    }

    /// Resolves the method description a legacy v2 stub belongs to,
    /// registering a unary description on the fly when the method name
    /// is new.
    pub fn ensure_unary_method(
        &self,
        service: &str,
        method_name: &str,
        request_class: &str,
        response_class: &str,
        request_codecs: &str,
        response_codecs: &str,
    ) -> LyrebirdResult<Arc<MethodEntry>> {
        let path = format!("/{method_name}");
        if let Some(entry) = self.inner.lock().by_path.get(&path) {
            return Ok(entry.clone());
        }
        self.register_method(MethodDescription {
            id: Uuid::new_v4().to_string(),
            description: None,
            service: service.to_string(),
            method_name: method_name.to_string(),
            connection_type: ConnectionType::Unary,
            proxy_url: None,
            request_class: request_class.to_string(),
            response_class: response_class.to_string(),
            request_codecs: request_codecs.to_string(),
            response_codecs: response_codecs.to_string(),
            created: unix_now(),
        })
    }

    pub fn method_by_id(&self, id: &str) -> Option<Arc<MethodEntry>> {
        self.inner.lock().methods.get(id).cloned()
    }

    pub fn method_by_path(&self, path: &str) -> Option<Arc<MethodEntry>> {
        self.inner.lock().by_path.get(path).cloned()
    }

    pub fn list_methods(&self, service: Option<&str>) -> Vec<Arc<MethodEntry>> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .methods
            .values()
            .filter(|entry| service.map_or(true, |name| entry.method.service == name))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.method
                .created
                .cmp(&b.method.created)
                .then_with(|| a.method.id.cmp(&b.method.id))
        });
        entries
    }

    /// Removes a method description. Descriptions still referenced by
    /// stubs stay put; the stubs must be deleted first.
    pub fn remove_method(&self, id: &str) -> LyrebirdResult<Arc<MethodEntry>> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.methods.get(id).cloned() else {
            return Err(LyrebirdError::MethodNotFound(id.to_string()));
        };
        if self.stubs.has_stubs_for(id) {
            return Err(LyrebirdError::MethodInUse(id.to_string()));
        }
        inner.methods.remove(id);
        inner.by_path.remove(&entry.method.grpc_path());
        Ok(entry)
    }

    /// Validates and stores a stub against an existing method description.
    pub fn create_stub(&self, stub: Stub) -> LyrebirdResult<Arc<StubSlot>> {
        stub.validate()?;
        if self.method_by_id(&stub.method_description_id).is_none() {
            return Err(LyrebirdError::MethodNotFound(
                stub.method_description_id.clone(),
            ));
        }
        Ok(self.stubs.insert(stub))
    }
}

fn build_target(method: &MethodDescription) -> LyrebirdResult<MethodTarget> {
    match &method.proxy_url {
        None => Ok(MethodTarget::Stubbed(MethodSchema::compile(method)?)),
        Some(url) => {
            let schema = if method.request_codecs.is_empty() || method.response_codecs.is_empty() {
                None
            } else {
                Some(MethodSchema::compile(method)?)
            };
            Ok(MethodTarget::Proxy {
                url: url.clone(),
                schema,
            })
        }
    }
}

fn only_proxy_url_differs(a: &MethodDescription, b: &MethodDescription) -> bool {
    a.service == b.service
        && a.method_name == b.method_name
        && a.connection_type == b.connection_type
        && a.request_class == b.request_class
        && a.response_class == b.response_class
        && a.request_codecs == b.request_codecs
        && a.response_codecs == b.response_codecs
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Handle shared by the gRPC surface and the management API.
#[derive(Clone)]
pub struct MockState {
    pub registry: Arc<MockRegistry>,
    pub telemetry: Arc<Telemetry>,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(MockRegistry::new()),
            telemetry: Arc::new(Telemetry::new()),
        }
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}
