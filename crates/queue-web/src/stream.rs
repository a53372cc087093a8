//! 实时视图推送（Server-Sent Events）
//!
//! 每个连接对应一个订阅；连接断开时响应体被释放，订阅随之注销。

use crate::handlers::ApiError;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use queue_workflow::{QueueView, Subscription, ViewFilter};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

/// SSE事件流，持有订阅句柄
pub struct LiveViewStream {
    subscription: Option<Subscription>,
    state: AppState,
}

impl LiveViewStream {
    fn new(subscription: Subscription, state: AppState) -> Self {
        state
            .metrics
            .set_live_subscribers(state.engine.publisher().total_subscribers());
        Self {
            subscription: Some(subscription),
            state,
        }
    }
}

fn to_event(view: &QueueView) -> Result<Event, axum::Error> {
    let name = match view {
        QueueView::Department(_) => "queue",
        QueueView::Patient(_) => "patient",
    };
    Event::default()
        .event(name)
        .id(view.version().to_string())
        .json_data(view)
}

impl Stream for LiveViewStream {
    type Item = Result<Event, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(subscription) = this.subscription.as_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(subscription).poll_next(cx) {
            Poll::Ready(Some(view)) => Poll::Ready(Some(to_event(&view))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for LiveViewStream {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(
                "Live stream {} closed for department {}",
                subscription.id(),
                subscription.department()
            );
            subscription.unsubscribe();
        }
        self.state
            .metrics
            .set_live_subscribers(self.state.engine.publisher().total_subscribers());
    }
}

async fn open_stream(
    state: AppState,
    department: &str,
    filter: ViewFilter,
) -> Result<Sse<LiveViewStream>, ApiError> {
    let subscription = state.engine.subscribe(department, filter).await?;
    debug!(
        "Live stream {} opened for department {} ({:?})",
        subscription.id(),
        subscription.department(),
        subscription.filter()
    );

    Ok(Sse::new(LiveViewStream::new(subscription, state))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// 科室视图推送（医护人员）
pub async fn department_stream(
    State(state): State<AppState>,
    Path(department): Path<String>,
) -> Result<Sse<LiveViewStream>, ApiError> {
    open_stream(state, &department, ViewFilter::Department).await
}

/// 患者视图推送
pub async fn patient_stream(
    State(state): State<AppState>,
    Path((department, patient_id)): Path<(String, String)>,
) -> Result<Sse<LiveViewStream>, ApiError> {
    open_stream(state, &department, ViewFilter::Patient(patient_id)).await
}
