//! 事件投递
//!
//! bundle、框架与服务三类事件的监听器注册、钩子拦截与同步/异步投递。

pub mod dispatcher;
pub mod event;
pub mod hooks;
pub mod listener;
pub mod service;

pub use dispatcher::FrameworkEvents;
pub use event::{
    BundleEvent, BundleEventType, FrameworkEvent, FrameworkEventType, ServiceEvent,
    ServiceEventType,
};
pub use hooks::{EventHook, HookRegistry, ListenerHook, ListenerInfo, ShrinkableSet};
pub use listener::{
    BundleListener, FnBundleListener, FnFrameworkListener, FnServiceListener, FrameworkListener,
    ServiceListener,
};
pub use service::{RegisteredService, ServiceState, OBJECT_CLASS, SERVICE_ID};
