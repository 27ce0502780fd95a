// routes/home.rs
// GET / -> login page; the form posts JSON to /login and follows the returned redirect.

use axum::response::Html;

pub async fn home() -> Html<&'static str> {
    Html(r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>SalesDesk · Sign in</title>
  <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/@picocss/pico@2/css/pico.min.css">
</head>
<body>
  <main class="container">
    <h1>SalesDesk</h1>
    <form id="login-form">
      <label>
        Username
        <input id="username" name="username" autocomplete="username" required>
      </label>
      <label>
        Authenticator code
        <input id="code" name="code" inputmode="numeric" pattern="\d{6}" maxlength="6" required>
      </label>
      <button type="submit">Sign in</button>
    </form>
    <p id="result"></p>
  </main>
  <script>
    const form = document.getElementById('login-form');
    const result = document.getElementById('result');

    form.addEventListener('submit', async (event) => {
      event.preventDefault();
      result.textContent = '';
      const body = {
        username: document.getElementById('username').value.trim(),
        code: document.getElementById('code').value.trim(),
      };
      try {
        const res = await fetch('/login', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify(body),
        });
        const data = await res.json();
        if (data.ok && data.redirect_url) {
          window.location.href = data.redirect_url;
          return;
        }
        result.textContent = data.message || 'Sign in failed.';
      } catch (err) {
        result.textContent = 'Network error: ' + err;
      }
    });
  </script>
</body>
</html>"#)
}
