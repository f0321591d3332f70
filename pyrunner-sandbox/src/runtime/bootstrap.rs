//! Worker script executed by the Python interpreter process
//!
//! The worker speaks newline-delimited JSON: requests arrive on stdin, events
//! leave on a duplicate of the original stdout descriptor. File descriptor 1 is
//! then pointed at stderr so that stray writes from user code (or C extensions)
//! cannot corrupt the protocol stream.
//!
//! Requests:
//! - `{"type": "load_package", "name": <package>, "module": <import name>}`
//! - `{"type": "run", "id": <u64>, "source": <text>}`
//!
//! Events:
//! - `ready` (once, with the interpreter version)
//! - `stdout` / `stderr` (one per completed line, a partial line is flushed
//!   when the other stream writes and at run end)
//! - `package_loaded` / `package_failed`
//! - `result` / `error` (terminal, tagged with the run id)

/// Environment variable that enables `pip install` fallback in the worker
pub const INSTALL_MISSING_ENV: &str = "PYRUNNER_INSTALL_MISSING";

pub const WORKER_SOURCE: &str = r#"
import ast
import importlib
import io
import json
import os
import subprocess
import sys
import traceback

_protocol = os.fdopen(os.dup(1), "w", encoding="utf-8", buffering=1)
os.dup2(2, 1)
_requests = sys.stdin
sys.stdin = io.StringIO("")
_install_missing = os.environ.get("PYRUNNER_INSTALL_MISSING") == "1"
_namespace = {"__name__": "__main__", "__builtins__": __builtins__}


def _text(value):
    if isinstance(value, str):
        return value.encode("utf-8", "backslashreplace").decode("utf-8")
    return value


def _post(message):
    message = {key: _text(value) for key, value in message.items()}
    _protocol.write(json.dumps(message) + "\n")
    _protocol.flush()


class _Console:
    """Line buffering shared by stdout and stderr so events keep write order"""

    def __init__(self):
        self._kind = None
        self._pending = ""

    def write(self, kind, text):
        if self._pending and kind != self._kind:
            self.flush()
        self._kind = kind
        self._pending += text
        while "\n" in self._pending:
            line, self._pending = self._pending.split("\n", 1)
            _post({"type": kind, "text": line + "\n"})

    def flush(self):
        if self._pending:
            _post({"type": self._kind, "text": self._pending})
            self._pending = ""


class _Stream(io.TextIOBase):
    encoding = "utf-8"

    def __init__(self, console, kind):
        self._console = console
        self._kind = kind

    def writable(self):
        return True

    def write(self, text):
        self._console.write(self._kind, text)
        return len(text)

    def flush(self):
        self._console.flush()


def _load_package(name, module):
    try:
        importlib.import_module(module)
    except ImportError:
        if not _install_missing:
            raise
        subprocess.run(
            [sys.executable, "-m", "pip", "install", "--quiet", name],
            check=True,
            stdout=subprocess.DEVNULL,
            stderr=subprocess.DEVNULL,
        )
        importlib.invalidate_caches()
        importlib.import_module(module)


def _execute(source):
    tree = ast.parse(source, "<sandbox>", "exec")
    tail = None
    if tree.body and isinstance(tree.body[-1], ast.Expr):
        tail = ast.Expression(tree.body.pop().value)
    exec(compile(tree, "<sandbox>", "exec"), _namespace)
    if tail is not None:
        value = eval(compile(tail, "<sandbox>", "eval"), _namespace)
        if value is not None:
            return str(value)
    return ""


def _describe(exc):
    if isinstance(exc, SyntaxError):
        lines = traceback.format_exception_only(type(exc), exc)
    else:
        tb = exc.__traceback__
        while tb is not None and tb.tb_frame.f_code.co_filename != "<sandbox>":
            tb = tb.tb_next
        lines = traceback.format_exception(type(exc), exc, tb)
    return "".join(lines).rstrip()


def _run(request):
    console = _Console()
    saved = sys.stdout, sys.stderr
    sys.stdout, sys.stderr = _Stream(console, "stdout"), _Stream(console, "stderr")
    try:
        text = _execute(request["source"])
        outcome = {"type": "result", "id": request["id"], "text": text}
    except BaseException as exc:
        outcome = {"type": "error", "id": request["id"], "message": _describe(exc)}
    finally:
        sys.stdout, sys.stderr = saved
        console.flush()
    _post(outcome)


def _main():
    _post({"type": "ready", "version": sys.version.split()[0]})
    while True:
        line = _requests.readline()
        if not line:
            break
        line = line.strip()
        if not line:
            continue
        request = json.loads(line)
        kind = request.get("type")
        if kind == "run":
            _run(request)
        elif kind == "load_package":
            try:
                _load_package(request["name"], request["module"])
                _post({"type": "package_loaded", "name": request["name"]})
            except BaseException as exc:
                _post({"type": "package_failed", "name": request["name"], "message": _describe(exc)})
        else:
            _post({"type": "error", "id": request.get("id", 0), "message": "unknown request: %s" % kind})


_main()
"#;
