//! Static pages the main proxy serves itself.

/// Served in place of a bare 502/503/504 when a site's instance does not answer.
pub(crate) const PHP_NOT_RESPONDING_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>PHP Not Responding</title>
    <style>
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: system-ui, -apple-system, sans-serif;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            background: #0f172a;
            color: #f8fafc;
            padding: 1.5rem;
        }
        .container { text-align: center; max-width: 480px; }
        .code { font-size: 4rem; font-weight: 700; color: #f87171; margin-bottom: 0.5rem; }
        h1 { font-size: 1.5rem; font-weight: 600; margin-bottom: 1.5rem; }
        .card {
            background: rgba(255, 255, 255, 0.04);
            border: 1px solid rgba(255, 255, 255, 0.08);
            border-radius: 12px;
            padding: 1.5rem;
            text-align: left;
        }
        .card p { color: #94a3b8; line-height: 1.7; margin-bottom: 1rem; }
        .card li { color: #cbd5e1; font-size: 0.9rem; margin-left: 1.25rem; line-height: 1.8; }
    </style>
</head>
<body>
    <div class="container">
        <div class="code">502</div>
        <h1>PHP Not Responding</h1>
        <div class="card">
            <p>The PHP runtime for this site is not responding. It may be stopped, restarting or overloaded.</p>
            <ul>
                <li>Check that the PHP instance is running</li>
                <li>Try restarting the PHP instance</li>
                <li>Look at the instance log for errors</li>
            </ul>
        </div>
    </div>
</body>
</html>"#;

/// Served by the catch-all block for hosts no site claims. The proxy fills in the requested host.
pub(crate) const SITE_NOT_CONFIGURED_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Site Not Configured</title>
    <style>
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: system-ui, -apple-system, sans-serif;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            background: #0f172a;
            color: #f8fafc;
            padding: 1.5rem;
        }
        .container { text-align: center; max-width: 480px; }
        .code { font-size: 4rem; font-weight: 700; color: #94a3b8; margin-bottom: 0.5rem; }
        h1 { font-size: 1.5rem; font-weight: 600; margin-bottom: 0.5rem; }
        .host {
            display: inline-block;
            margin: 1rem 0 1.5rem;
            padding: 0.5rem 1rem;
            border-radius: 8px;
            font-family: monospace;
            color: #f59e0b;
            background: rgba(245, 158, 11, 0.1);
            border: 1px solid rgba(245, 158, 11, 0.2);
        }
        p { color: #94a3b8; line-height: 1.7; }
    </style>
</head>
<body>
    <div class="container">
        <div class="code">404</div>
        <h1>Site Not Configured</h1>
        <div class="host">{http.request.host}</div>
        <p>This domain is not configured on this server. Create a site for it and point its DNS here.</p>
    </div>
</body>
</html>"#;
