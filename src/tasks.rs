use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, info};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::task::{NewTask, Task, TaskRecord, TaskUpdate};
use crate::models::{bson_now, decode, encode, to_bson_time};
use crate::session::current_identity;
use crate::store::{DocumentStore, Query, SortOrder, Update, TASKS};

/// All tasks of `user_id`, soonest due date first.
pub async fn list_tasks(store: &dyn DocumentStore, user_id: &str) -> AppResult<Vec<Task>> {
    debug!("Fetching tasks for user: {}", user_id);
    let query = Query::new()
        .eq("userId", user_id)
        .order_by("dueDate", SortOrder::Ascending);
    let docs = store.query(TASKS, query).await.map_err(|e| {
        error!("Error fetching tasks: {}", e);
        e
    })?;

    let tasks = docs
        .into_iter()
        .map(|doc| decode::<TaskRecord>(doc).map(Task::from))
        .collect::<AppResult<Vec<_>>>()?;
    debug!("Fetched tasks: {}", tasks.len());
    Ok(tasks)
}

/// Stores a new, not yet completed task and returns its id.
pub async fn create_task(store: &dyn DocumentStore, user_id: &str, new_task: &NewTask) -> AppResult<String> {
    let title = new_task.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Please enter a task title".to_string()));
    }

    let record = TaskRecord {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        title: title.to_string(),
        description: new_task
            .description
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        completed: false,
        priority: new_task.priority,
        due_date: to_bson_time(new_task.due_date),
        created_at: bson_now(),
        updated_at: None,
    };

    let id = store.insert(TASKS, encode(&record)?).await.map_err(|e| {
        error!("Error creating task: {}", e);
        e
    })?;
    info!("Task {} created for user {}", id, user_id);
    Ok(id)
}

/// Merges the provided fields into the task and stamps `updatedAt`.
/// Last write wins.
pub async fn update_task(store: &dyn DocumentStore, task_id: &str, updates: &TaskUpdate) -> AppResult<()> {
    let mut update = Update::new();
    if let Some(title) = &updates.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Please enter a task title".to_string()));
        }
        update = update.set("title", title);
    }
    if let Some(description) = &updates.description {
        update = update.set("description", description.trim());
    }
    if let Some(completed) = updates.completed {
        update = update.set("completed", completed);
    }
    if let Some(priority) = updates.priority {
        update = update.set("priority", priority.as_str());
    }
    if let Some(due_date) = updates.due_date {
        update = update.set("dueDate", to_bson_time(due_date));
    }
    update = update.set("updatedAt", bson_now());

    store.update(TASKS, task_id, update).await.map_err(|e| {
        error!("Error updating task: {}", e);
        e
    })
}

/// Deleting a task that is already gone is not an error.
pub async fn delete_task(store: &dyn DocumentStore, task_id: &str) -> AppResult<()> {
    store.delete(TASKS, task_id).await.map_err(|e| {
        error!("Error deleting task: {}", e);
        e
    })
}

async fn ensure_owner(store: &dyn DocumentStore, task_id: &str, user_id: &str) -> AppResult<Option<TaskRecord>> {
    let task = match store.get(TASKS, task_id).await? {
        Some(doc) => decode::<TaskRecord>(doc)?,
        None => return Ok(None),
    };
    if task.user_id != user_id {
        return Err(AppError::Permission("Cannot modify another user's task".to_string()));
    }
    Ok(Some(task))
}

// ─── HANDLERS ──────────────────────────────────────────────────────────────────

// GET /tasks
pub async fn get_tasks(req: HttpRequest, data: web::Data<AppState>) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let tasks = list_tasks(data.store.as_ref(), &identity.uid).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

// POST /tasks
pub async fn post_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<NewTask>,
) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let id = create_task(data.store.as_ref(), &identity.uid, &payload).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "id": id })))
}

// PUT /tasks/{task_id}
pub async fn put_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<TaskUpdate>,
) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    if ensure_owner(data.store.as_ref(), &task_id, &identity.uid).await?.is_none() {
        return Err(AppError::NotFound("Task not found".to_string()));
    }
    update_task(data.store.as_ref(), &task_id, &payload).await?;
    Ok(HttpResponse::Ok().body("Task updated"))
}

// DELETE /tasks/{task_id}
pub async fn remove_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    ensure_owner(data.store.as_ref(), &task_id, &identity.uid).await?;
    delete_task(data.store.as_ref(), &task_id).await?;
    Ok(HttpResponse::Ok().body("Task deleted"))
}
