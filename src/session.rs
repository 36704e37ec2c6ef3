// src/session.rs

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http, Error, HttpMessage, HttpRequest, HttpResponse,
};
use futures::future::{ok, Ready};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::auth::validate_jwt;
use crate::error::{AppError, AppResult};

/// The signed-in user a request acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub email: String,
}

/// Current identity of the request, or `Unauthorized` when it carried no
/// valid bearer token.
pub fn current_identity(req: &HttpRequest) -> AppResult<Identity> {
    req.extensions()
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Please sign in first".to_string()))
}

// ─── MIDDLEWARE ────────────────────────────────────────────────────────────────

/// Decodes `Authorization: Bearer <jwt>` and stores the `Identity` in the
/// request extensions. Requests without the header pass through anonymous;
/// a bad token is rejected here.
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: String,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        if let Some(token) = token {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(Identity {
                        uid: claims.sub,
                        display_name: claims.name,
                        email: claims.email,
                    });
                }
                Err(e) => {
                    debug!("Rejected bearer token: {}", e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .body(format!("Invalid token: {}", e))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

// ─── IDENTITY EVENTS ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Identity),
    SignedOut(Identity),
}

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;
type Listeners = Mutex<HashMap<u64, Listener>>;

/// Identity-change event source. Listeners run synchronously on `publish`
/// and must not subscribe or unsubscribe from inside the callback.
#[derive(Default)]
pub struct SessionEvents {
    next_id: AtomicU64,
    listeners: Arc<Listeners>,
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.listeners.lock() {
            Ok(mut listeners) => {
                listeners.insert(id, Box::new(listener));
            }
            Err(_) => error!("Session listener registry poisoned; listener {} not registered", id),
        }
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        match self.listeners.lock() {
            Ok(listeners) => {
                for listener in listeners.values() {
                    listener(&event);
                }
            }
            Err(_) => error!("Session listener registry poisoned; dropped {:?}", event),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ada() -> Identity {
        Identity {
            uid: "u1".into(),
            display_name: "Ada".into(),
            email: "ada@example.com".into(),
        }
    }

    #[test]
    fn listeners_see_events_until_unsubscribed() {
        let events = SessionEvents::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let subscription = events.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        assert_eq!(events.listener_count(), 1);

        events.publish(SessionEvent::SignedIn(ada()));
        events.publish(SessionEvent::SignedOut(ada()));
        drop(subscription);
        events.publish(SessionEvent::SignedIn(ada()));

        assert_eq!(events.listener_count(), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionEvent::SignedIn(ada()), SessionEvent::SignedOut(ada())]
        );
    }

    #[test]
    fn every_subscriber_is_called() {
        let events = SessionEvents::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = calls.clone();
        let b = calls.clone();
        let _first = events.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let _second = events.subscribe(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        events.publish(SessionEvent::SignedOut(ada()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscription_outliving_source_is_harmless() {
        let events = SessionEvents::new();
        let subscription = events.subscribe(|_| {});
        drop(events);
        drop(subscription);
    }
}
