//! Todo tools over the shared [`TodoStore`](crate::todo::TodoStore), keyed by session.

use serde_json::Value;

use crate::todo::TodoError;
use crate::tools::args::{get_string, get_u64};
use crate::tools::context::ToolCtx;
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::Envelope;

fn get_index(args: &Value) -> Result<u32, String> {
    let index = get_u64(args, "index")?;
    u32::try_from(index)
        .ok()
        .filter(|i| *i >= 1)
        .ok_or_else(|| "'index' must be a positive integer".to_string())
}

fn todo_error(e: TodoError) -> Envelope {
    Envelope::error(e.to_string())
}

pub struct AddTodo;

impl Tool for AddTodo {
    fn name(&self) -> &str {
        "add_todo_tool"
    }

    fn description(&self) -> &str {
        "Add an item to this session's todo list. Returns the item with its index."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "What needs doing" }
            },
            "required": ["content"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let content = match get_string(args, "content") {
                Ok(c) => c,
                Err(e) => return Envelope::error(e),
            };
            match ctx.todos.add(&ctx.session, &content) {
                Ok((item, count)) => Envelope::ok().with_json("item", &item).with("count", count),
                Err(e) => todo_error(e),
            }
        })
    }
}

pub struct UpdateTodoItem;

impl Tool for UpdateTodoItem {
    fn name(&self) -> &str {
        "update_todo_item_tool"
    }

    fn description(&self) -> &str {
        "Replace the text of a todo item by index."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "index": { "type": "integer", "description": "1-based item index" },
                "content": { "type": "string", "description": "New text" }
            },
            "required": ["index", "content"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let index = match get_index(args) {
                Ok(i) => i,
                Err(e) => return Envelope::error(e),
            };
            let content = match get_string(args, "content") {
                Ok(c) => c,
                Err(e) => return Envelope::error(e),
            };
            match ctx.todos.update_content(&ctx.session, index, &content) {
                Ok(item) => Envelope::ok().with_json("item", &item),
                Err(e) => todo_error(e),
            }
        })
    }
}

pub struct UpdateTodoStatus;

impl Tool for UpdateTodoStatus {
    fn name(&self) -> &str {
        "update_todo_status_tool"
    }

    fn description(&self) -> &str {
        "Set the status of a todo item: pending, in_progress or completed (synonyms like 'done' or 'wip' work)."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "index": { "type": "integer", "description": "1-based item index" },
                "status": { "type": "string", "description": "pending | in_progress | completed" }
            },
            "required": ["index", "status"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let index = match get_index(args) {
                Ok(i) => i,
                Err(e) => return Envelope::error(e),
            };
            let status = match get_string(args, "status") {
                Ok(s) => s,
                Err(e) => return Envelope::error(e),
            };
            match ctx.todos.update_status(&ctx.session, index, &status) {
                Ok(item) => Envelope::ok().with_json("item", &item),
                Err(e) => todo_error(e),
            }
        })
    }
}

pub struct ClearTodos;

impl Tool for ClearTodos {
    fn name(&self) -> &str {
        "clear_todos_tool"
    }

    fn description(&self) -> &str {
        "Remove every item from this session's todo list."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, _args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            ctx.todos.clear(&ctx.session);
            Envelope::ok().with("count", 0)
        })
    }
}

pub struct ListTodos;

impl Tool for ListTodos {
    fn name(&self) -> &str {
        "list_todos_tool"
    }

    fn description(&self) -> &str {
        "List this session's todo items in index order."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn execute<'a>(&'a self, ctx: &'a ToolCtx, _args: &'a Value) -> BoxFuture<'a, Envelope> {
        Box::pin(async move {
            let items = ctx.todos.list(&ctx.session);
            let count = items.len();
            Envelope::ok().with_json("items", &items).with("count", count)
        })
    }
}
