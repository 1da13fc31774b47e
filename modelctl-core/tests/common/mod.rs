#![allow(dead_code)]

pub mod schema;
pub mod server;

use modelctl_core::config::SessionContext;
use modelctl_core::model::ModelResourceClient;
use modelctl_core::prost_reflect::DescriptorPool;
use modelctl_core::schema::SchemaCatalog;
use server::FakeXos;
use std::sync::Arc;

pub fn session() -> Arc<SessionContext> {
    Arc::new(SessionContext {
        username: "admin@opencord.org".to_string(),
        password: "letmein".to_string(),
        ..Default::default()
    })
}

pub fn catalog() -> Arc<SchemaCatalog<DescriptorPool>> {
    let session = session();
    Arc::new(SchemaCatalog::new(
        schema::xos_pool(),
        session.services.clone(),
    ))
}

pub fn client(server: &FakeXos) -> ModelResourceClient<FakeXos, DescriptorPool> {
    ModelResourceClient::new(server.clone(), catalog(), session())
}
