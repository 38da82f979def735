//! 服务状态
//!
//! 服务注册表在运行时之外；事件子系统只读取服务的对象类、当前属性与修改前属性，
//! 并询问某个 bundle 能否看到服务的对象类。

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::bundle::BundleId;
use crate::resource::{AttrValue, Attributes};

/// 服务属性中的对象类键
pub const OBJECT_CLASS: &str = "objectClass";
/// 服务 ID 键
pub const SERVICE_ID: &str = "service.id";

/// 服务状态接口
pub trait ServiceState: Send + Sync {
    /// 服务 ID
    fn service_id(&self) -> u64;

    /// 注册服务的 bundle
    fn owner(&self) -> BundleId;

    /// 对象类
    fn object_classes(&self) -> Vec<String>;

    /// 当前属性（含对象类）
    fn properties(&self) -> Attributes;

    /// 最近一次修改前的属性
    fn previous_properties(&self) -> Option<Attributes>;

    /// 对象类从指定 bundle 的视角看是否可赋值
    fn is_assignable_to(&self, bundle: BundleId, class_name: &str) -> bool;
}

/// 内存服务状态
#[derive(Debug)]
pub struct RegisteredService {
    id: u64,
    owner: BundleId,
    classes: Vec<String>,
    properties: RwLock<Attributes>,
    previous: RwLock<Option<Attributes>>,
    hidden: RwLock<HashSet<(BundleId, String)>>,
}

impl RegisteredService {
    /// 创建服务状态
    pub fn new(id: u64, owner: BundleId, classes: &[&str], properties: Attributes) -> Self {
        let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        Self {
            id,
            owner,
            properties: RwLock::new(Self::decorate(id, &classes, properties)),
            classes,
            previous: RwLock::new(None),
            hidden: RwLock::new(HashSet::new()),
        }
    }

    fn decorate(id: u64, classes: &[String], mut properties: Attributes) -> Attributes {
        properties.insert(
            OBJECT_CLASS.to_string(),
            AttrValue::List(classes.iter().cloned().map(AttrValue::String).collect()),
        );
        properties.insert(SERVICE_ID.to_string(), AttrValue::Long(id as i64));
        properties
    }

    /// 替换属性，原属性成为修改前属性
    pub fn set_properties(&self, properties: Attributes) {
        let next = Self::decorate(self.id, &self.classes, properties);
        let previous = std::mem::replace(&mut *self.properties.write(), next);
        *self.previous.write() = Some(previous);
    }

    /// 让对象类对某个 bundle 不可见
    pub fn hide_class_from(&self, bundle: BundleId, class_name: impl Into<String>) {
        self.hidden.write().insert((bundle, class_name.into()));
    }
}

impl ServiceState for RegisteredService {
    fn service_id(&self) -> u64 {
        self.id
    }

    fn owner(&self) -> BundleId {
        self.owner
    }

    fn object_classes(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn properties(&self) -> Attributes {
        self.properties.read().clone()
    }

    fn previous_properties(&self) -> Option<Attributes> {
        self.previous.read().clone()
    }

    fn is_assignable_to(&self, bundle: BundleId, class_name: &str) -> bool {
        !self
            .hidden
            .read()
            .contains(&(bundle, class_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_properties_keeps_previous() {
        let mut props = Attributes::new();
        props.insert("color".to_string(), AttrValue::from("red"));
        let service = RegisteredService::new(1, BundleId::new(1), &["com.acme.Api"], props);
        assert!(service.previous_properties().is_none());

        let mut next = Attributes::new();
        next.insert("color".to_string(), AttrValue::from("blue"));
        service.set_properties(next);

        let previous = service.previous_properties().unwrap();
        assert_eq!(previous.get("color").and_then(AttrValue::as_str), Some("red"));
        assert!(service.properties().contains_key(OBJECT_CLASS));
    }

    #[test]
    fn test_hidden_class() {
        let service = RegisteredService::new(2, BundleId::new(1), &["a.B"], Attributes::new());
        service.hide_class_from(BundleId::new(5), "a.B");
        assert!(!service.is_assignable_to(BundleId::new(5), "a.B"));
        assert!(service.is_assignable_to(BundleId::new(6), "a.B"));
    }
}
