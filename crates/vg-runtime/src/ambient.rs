//! Ambient "current connection" access (spec §6 CLI surface:
//! `current_connection`), threaded explicitly through a task-local rather
//! than a process-global, mirroring `vg-worker`'s `CURRENT_WORKER`.

use std::future::Future;

tokio::task_local! {
    static CURRENT_CONNECTION: String;
}

/// Runs `fut` with `name` available to nested calls via [`current_connection`].
pub async fn scoped<F, T>(name: impl Into<String>, fut: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_CONNECTION.scope(name.into(), fut).await
}

/// The name of the connection driving the current task, if any.
pub fn current_connection() -> Option<String> {
    CURRENT_CONNECTION.try_with(|name| name.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scoped_name_is_visible_inside_but_not_outside() {
        assert_eq!(current_connection(), None);
        let seen = scoped("conn-a", async { current_connection() }).await;
        assert_eq!(seen, Some("conn-a".to_string()));
        assert_eq!(current_connection(), None);
    }

    #[tokio::test]
    async fn nested_scopes_see_the_innermost_name() {
        let seen = scoped("outer", async {
            scoped("inner", async { current_connection() }).await
        })
        .await;
        assert_eq!(seen, Some("inner".to_string()));
    }
}
