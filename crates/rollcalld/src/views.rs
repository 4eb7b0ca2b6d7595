//! Server-rendered HTML pages.

use axum::http::StatusCode;

const STYLE: &str = "
body { font-family: system-ui, sans-serif; max-width: 40rem; margin: 2rem auto; padding: 0 1rem; color: #222; }
nav a { margin-right: 1rem; }
form { display: grid; gap: 0.75rem; }
input[type=text] { padding: 0.4rem; font-size: 1rem; }
video, canvas, img.preview { width: 100%; max-width: 32rem; border-radius: 4px; background: #eee; }
button { padding: 0.5rem 1rem; font-size: 1rem; }
.error { color: #a40000; }
.ok { color: #1b6e20; }
";

/// Webcam capture: fills the hidden `imageData` input with a JPEG data URL,
/// either from the live camera or from a chosen file.
const CAPTURE_SCRIPT: &str = r#"
<script>
(function () {
  const video = document.getElementById('camera');
  const canvas = document.getElementById('snapshot');
  const field = document.getElementById('imageData');
  const file = document.getElementById('imageFile');
  const form = field.form;

  if (navigator.mediaDevices && navigator.mediaDevices.getUserMedia) {
    navigator.mediaDevices.getUserMedia({ video: true })
      .then(function (stream) { video.srcObject = stream; })
      .catch(function () { video.hidden = true; });
  } else {
    video.hidden = true;
  }

  document.getElementById('capture').addEventListener('click', function () {
    if (!video.videoWidth) { return; }
    canvas.width = video.videoWidth;
    canvas.height = video.videoHeight;
    canvas.getContext('2d').drawImage(video, 0, 0);
    field.value = canvas.toDataURL('image/jpeg', 0.92);
    canvas.hidden = false;
  });

  file.addEventListener('change', function () {
    const chosen = file.files[0];
    if (!chosen) { return; }
    const reader = new FileReader();
    reader.onload = function () { field.value = reader.result; };
    reader.readAsDataURL(chosen);
  });

  form.addEventListener('submit', function (event) {
    if (!field.value) {
      event.preventDefault();
      alert('Capture or choose a photo first.');
    }
  });
})();
</script>
"#;

/// Escape text for HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title} | Roll Call</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <nav><a href=\"/\">Home</a><a href=\"/register\">Register</a><a href=\"/mark\">Mark attendance</a></nav>\n\
         {body}\n</body>\n</html>\n",
        title = escape(title),
    )
}

fn capture_widget() -> &'static str {
    "<video id=\"camera\" autoplay playsinline></video>\n\
     <button type=\"button\" id=\"capture\">Capture photo</button>\n\
     <canvas id=\"snapshot\" hidden></canvas>\n\
     <label>Or choose a photo <input type=\"file\" id=\"imageFile\" accept=\"image/*\"></label>\n\
     <input type=\"hidden\" name=\"imageData\" id=\"imageData\">"
}

pub fn index() -> String {
    layout(
        "Home",
        "<h1>Roll Call</h1>\n\
         <p>Face-recognition attendance.</p>\n\
         <ul>\n<li><a href=\"/register\">Register a student</a></li>\n\
         <li><a href=\"/mark\">Mark attendance</a></li>\n</ul>",
    )
}

pub fn register_form() -> String {
    let body = format!(
        "<h1>Register a student</h1>\n\
         <form method=\"post\" action=\"/register\">\n\
         <label>Full name <input type=\"text\" name=\"name\" required></label>\n\
         <label>Matriculation number <input type=\"text\" name=\"mat_no\" required pattern=\"[A-Za-z0-9_\\-]+\" maxlength=\"64\"></label>\n\
         {widget}\n<button type=\"submit\">Register</button>\n</form>\n{CAPTURE_SCRIPT}",
        widget = capture_widget(),
    );
    layout("Register", &body)
}

pub fn mark_form() -> String {
    let body = format!(
        "<h1>Mark attendance</h1>\n\
         <form method=\"post\" action=\"/mark\">\n\
         <label>Course code <input type=\"text\" name=\"course_code\" required></label>\n\
         {widget}\n<button type=\"submit\">Mark attendance</button>\n</form>\n{CAPTURE_SCRIPT}",
        widget = capture_widget(),
    );
    layout("Mark attendance", &body)
}

/// Shown after a successful match.
pub fn confirmation(name: &str, mat_number: &str, course: &str) -> String {
    let body = format!(
        "<h1 class=\"ok\">Attendance marked</h1>\n<dl>\n\
         <dt>Name</dt><dd>{name}</dd>\n\
         <dt>Matriculation number</dt><dd>{mat_number}</dd>\n\
         <dt>Course</dt><dd>{course}</dd>\n</dl>\n\
         <p><a href=\"/mark\">Mark another</a></p>",
        name = escape(name),
        mat_number = escape(mat_number),
        course = escape(course),
    );
    layout("Attendance marked", &body)
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    let heading = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<h1 class=\"error\">{code} {heading}</h1>\n<p>{message}</p>\n\
         <p><a href=\"javascript:history.back()\">Go back</a> or <a href=\"/\">return home</a>.</p>",
        code = status.as_u16(),
        heading = escape(heading),
        message = escape(message),
    );
    layout(heading, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<b>\"Ada\" & 'Bob'</b>"), "&lt;b&gt;&quot;Ada&quot; &amp; &#39;Bob&#39;&lt;/b&gt;");
    }

    #[test]
    fn confirmation_escapes_fields() {
        let html = confirmation("<script>", "MAT001", "CS101");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<dd><script>"));
        assert!(html.contains("MAT001"));
        assert!(html.contains("CS101"));
    }

    #[test]
    fn forms_post_expected_fields() {
        let register = register_form();
        for field in ["name=\"name\"", "name=\"mat_no\"", "name=\"imageData\"", "action=\"/register\""] {
            assert!(register.contains(field), "{field}");
        }
        let mark = mark_form();
        for field in ["name=\"course_code\"", "name=\"imageData\"", "action=\"/mark\""] {
            assert!(mark.contains(field), "{field}");
        }
    }

    #[test]
    fn error_page_shows_status_and_message() {
        let html = error_page(StatusCode::NOT_FOUND, "Face not recognized");
        assert!(html.contains("404 Not Found"));
        assert!(html.contains("Face not recognized"));
    }
}
