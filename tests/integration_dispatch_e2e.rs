use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use serde_json::{Value, json};

// Shared test context
struct TestContext {
    client: reqwest::Client,
    base_url: String,
}

/// Accounts seeded in the identity service and `profiles`/`technicians`.
struct Account {
    email: String,
    password: String,
}

static REDIS_CLIENT: Lazy<redis::Client> = Lazy::new(|| {
    let url = std::env::var("E2E_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
    redis::Client::open(url).unwrap()
});

fn account(role: &str) -> Account {
    let upper = role.to_uppercase();
    Account {
        email: std::env::var(format!("E2E_{upper}_EMAIL")).unwrap(),
        password: std::env::var(format!("E2E_{upper}_PASSWORD")).unwrap(),
    }
}

impl TestContext {
    fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .cookie_store(true)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap(),
            base_url: std::env::var("E2E_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3000".to_string()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Logs in and returns the CSRF token for later mutating calls.
    async fn login(&self, account: &Account) -> (Value, String) {
        let response = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": account.email, "password": account.password }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200, "Login failed");

        let csrf = response
            .cookies()
            .find(|c| c.name() == "csrf_token")
            .map(|c| c.value().to_string())
            .expect("CSRF token not found in login response");
        (response.json().await.unwrap(), csrf)
    }

    async fn post(&self, path: &str, csrf: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("x-csrf-token", csrf)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

async fn reset_login_throttle(email: &str) {
    let mut con: ConnectionManager = REDIS_CLIENT.get_connection_manager().await.unwrap();
    let _: () = redis::cmd("DEL")
        .arg(format!("rate_limit:login:{}", email.to_lowercase()))
        .query_async(&mut con)
        .await
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a running server, Postgres, Redis and identity backend"]
    async fn anonymous_dashboard_redirects_to_its_login() {
        let context = TestContext::new();

        let response = context
            .client
            .get(context.url("/dispatcher/dashboard"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 303);
        assert_eq!(response.headers()["location"], "/dispatcher/login");

        let api = context.client.get(context.url("/api/jobs")).send().await.unwrap();
        assert_eq!(api.status().as_u16(), 401);
    }

    #[tokio::test]
    #[ignore = "requires a running server, Postgres, Redis and identity backend"]
    async fn job_runs_from_creation_to_done() {
        let owner = account("owner");
        let technician = account("technician");
        reset_login_throttle(&owner.email).await;
        reset_login_throttle(&technician.email).await;

        // Step 1: owner creates and assigns
        let owner_ctx = TestContext::new();
        let (login, owner_csrf) = owner_ctx.login(&owner).await;
        assert_eq!(login["redirect"], "/owner/dashboard");

        let created = owner_ctx
            .post("/api/jobs", &owner_csrf, json!({ "service": "AC repair" }))
            .await;
        assert_eq!(created.status().as_u16(), 201, "Job creation failed");
        let job: Value = created.json().await.unwrap();
        assert_eq!(job["status"], "new");
        let job_id = job["id"].as_str().unwrap().to_string();

        let technicians: Value = owner_ctx
            .client
            .get(owner_ctx.url("/api/technicians"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        // the seeded technician is the only active one
        let technician_id = technicians[0]["id"].clone();

        let assigned = owner_ctx
            .post(
                &format!("/api/jobs/{job_id}/assign"),
                &owner_csrf,
                json!({ "technician_id": technician_id }),
            )
            .await;
        assert_eq!(assigned.status().as_u16(), 200, "Assignment failed");

        // Step 2: completing a new job is refused
        let premature = owner_ctx
            .post(
                &format!("/api/jobs/{job_id}/transition"),
                &owner_csrf,
                json!({ "status": "done" }),
            )
            .await;
        assert_eq!(premature.status().as_u16(), 409);

        // Step 3: the technician works the job
        let tech_ctx = TestContext::new();
        let (_, tech_csrf) = tech_ctx.login(&technician).await;

        let started: Value = tech_ctx
            .post(
                &format!("/api/jobs/{job_id}/transition"),
                &tech_csrf,
                json!({ "status": "in_progress" }),
            )
            .await
            .json()
            .await
            .unwrap();
        assert!(started["started_at"].is_string());

        let done: Value = tech_ctx
            .post(
                &format!("/api/jobs/{job_id}/transition"),
                &tech_csrf,
                json!({ "status": "done", "completion_notes": "Replaced capacitor" }),
            )
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(done["status"], "done");
        assert_eq!(done["started_at"], started["started_at"]);
        assert!(done["completed_at"].is_string());

        // Step 4: a done job is closed
        let reopened = owner_ctx
            .post(
                &format!("/api/jobs/{job_id}/assign"),
                &owner_csrf,
                json!({ "technician_id": null }),
            )
            .await;
        assert_eq!(reopened.status().as_u16(), 409);
    }

    #[tokio::test]
    #[ignore = "requires a running server, Postgres, Redis and identity backend"]
    async fn mutating_requests_need_the_csrf_header() {
        let owner = account("owner");
        reset_login_throttle(&owner.email).await;

        let context = TestContext::new();
        context.login(&owner).await;

        let response = context
            .client
            .post(context.url("/api/jobs"))
            .json(&json!({ "service": "Boiler" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 403);
    }
}
