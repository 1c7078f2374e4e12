use std::fmt::Debug;

use async_trait::async_trait;
use either::Either;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ObjectList, Status},
    Error, Resource, ResourceExt,
};
use mockall::automock;
use serde::de::DeserializeOwned;

/// Mockable subset of `kube::Api` used by the controller
#[automock]
#[async_trait]
pub trait Api<T: Clone + Send + Sync + Resource>: Send + Sync {
    fn as_inner(&self) -> kube::Api<T>;
    async fn apply(&self, obj: T, field_manager: &str) -> Result<T, Error>;
    async fn create(&self, obj: &T) -> Result<T, Error>;
    async fn delete(&self, name: &str) -> Result<Either<T, Status>, Error>;
    async fn get(&self, name: &str) -> Result<Option<T>, Error>;
    async fn list(&self, lp: &ListParams) -> Result<ObjectList<T>, Error>;
    /// Replaces the status subresource. The object's resourceVersion is sent
    /// along, so a stale object is rejected with a 409 Conflict.
    async fn replace_status(&self, obj: &T) -> Result<T, Error>;
}

#[async_trait]
impl<T> Api<T> for kube::Api<T>
where
    T: Clone
        + DeserializeOwned
        + Debug
        + Resource<DynamicType = ()>
        + serde::Serialize
        + Send
        + Sync,
{
    fn as_inner(&self) -> kube::Api<T> {
        self.to_owned()
    }
    async fn apply(&self, obj: T, field_manager: &str) -> Result<T, Error> {
        let name = obj.name_any();
        let pp = PatchParams::apply(field_manager).force();
        let patch = Patch::Apply(obj);
        self.patch(&name, &pp, &patch).await
    }
    async fn create(&self, obj: &T) -> Result<T, Error> {
        self.create(&PostParams::default(), obj).await
    }
    async fn delete(&self, name: &str) -> Result<Either<T, Status>, Error> {
        self.delete(name, &DeleteParams::background()).await
    }
    async fn get(&self, name: &str) -> Result<Option<T>, Error> {
        self.get_opt(name).await
    }
    async fn list(&self, lp: &ListParams) -> Result<ObjectList<T>, Error> {
        self.list(lp).await
    }
    async fn replace_status(&self, obj: &T) -> Result<T, Error> {
        let data = serde_json::to_vec(obj).map_err(Error::SerdeError)?;
        self.replace_status(&obj.name_any(), &PostParams::default(), data)
            .await
    }
}

#[automock]
#[allow(clippy::multiple_bound_locations)]
pub trait IntoApi<T: Resource + 'static + Send + Sync>: Send + Sync {
    fn all(&self) -> Box<dyn Api<T>>;
    fn namespaced(&self, namespace: &str) -> Box<dyn Api<T>>
    where
        T: Resource<Scope = k8s_openapi::NamespaceResourceScope>;
}

impl<T> IntoApi<T> for kube::Client
where
    T: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + serde::Serialize
        + Send
        + Sync
        + 'static,
{
    fn all(&self) -> Box<dyn Api<T>> {
        Box::new(kube::Api::all(self.clone()))
    }

    fn namespaced(&self, namespace: &str) -> Box<dyn Api<T>>
    where
        T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    {
        Box::new(kube::Api::namespaced(self.clone(), namespace))
    }
}
