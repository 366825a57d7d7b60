// src/router/training.rs — Labelled routing examples
//
// Bilingual (English/Russian) examples across the nine tool intents, used to
// build the neural router's embedding index. Kept as data so deployments can
// swap in their own sets.

pub const TOOL_NAMES: [&str; 9] = [
    "read", "grep", "bash", "ls", "glob", "write", "edit", "find", "help",
];

/// (tool, example) pairs in a stable order.
pub fn training_examples() -> Vec<(&'static str, &'static str)> {
    let mut examples = Vec::new();
    for (tool, set) in [
        ("read", READ),
        ("grep", GREP),
        ("bash", BASH),
        ("ls", LS),
        ("glob", GLOB),
        ("write", WRITE),
        ("edit", EDIT),
        ("find", FIND),
        ("help", HELP),
    ] {
        for example in set {
            examples.push((tool, *example));
        }
    }
    examples
}

const READ: &[&str] = &[
    "read core/tools.py",
    "show me the file agent.py",
    "display contents of router.py",
    "open the config file",
    "what's in file.py",
    "let me see main.py",
    "can you show server.py",
    "print the file requirements.txt",
    "view the source of utils.py",
    "read the readme",
    "show me what's inside config.json",
    "output the contents of .env",
    "cat the log file",
    "look at the contents of Dockerfile",
    "read lines 10-50 of agent.py",
    "show this file to me",
    "прочитай файл tools.py",
    "покажи файл agent.py",
    "открой конфиг",
    "что в файле router.py",
    "покажи содержимое server.py",
    "выведи файл requirements.txt",
    "давай посмотрим main.py",
];

const GREP: &[&str] = &[
    "search for 'def route' in router.py",
    "grep TODO in all files",
    "find all occurrences of import os",
    "search for class Agent",
    "where is the function process_stream defined",
    "find references to PatternRouter",
    "search the codebase for timeout",
    "look for all usages of confidence",
    "grep for logging.error",
    "search for TODO comments",
    "find all print statements",
    "look for database connection code",
    "find the word deprecated in source",
    "найди 'def route' в router.py",
    "поиск TODO во всех файлах",
    "где определена функция process_stream",
    "найди все вхождения import os",
    "поищи в коде timeout",
    "где используется PatternRouter",
    "найди все print в коде",
];

const BASH: &[&str] = &[
    "run pip install requests",
    "execute python test.py",
    "run the tests",
    "install dependencies",
    "run pytest",
    "execute make build",
    "start the server",
    "run the linter",
    "check python version",
    "run mypy on the project",
    "compile the project",
    "run docker build",
    "restart the service",
    "run npm install",
    "git status",
    "git log --oneline -10",
    "git diff HEAD",
    "commit the changes",
    "push to origin",
    "git stash",
    "show recent commits",
    "запусти тесты",
    "выполни pip install",
    "запусти сервер",
    "установи зависимости",
    "собери проект",
    "запусти линтер",
    "покажи git status",
    "сделай git commit",
];

const LS: &[&str] = &[
    "list files in core/",
    "show directory contents",
    "what files are here",
    "list the current directory",
    "show me the project structure",
    "what's in the tests folder",
    "show files in this directory",
    "list all files",
    "what's in the root directory",
    "show the folder structure",
    "list contents of validators/",
    "show me the directory listing",
    "покажи файлы в core/",
    "список файлов в директории",
    "что в папке tests",
    "покажи структуру проекта",
    "какие файлы в текущей директории",
    "перечисли файлы",
];

const GLOB: &[&str] = &[
    "find all Python files in the project",
    "find all .py files",
    "find all test files",
    "find files matching *.json",
    "show all TypeScript files",
    "list all markdown files",
    "find all config files",
    "find files with .yaml extension",
    "find all files named __init__.py",
    "find all Dockerfiles",
    "find all shell scripts",
    "glob for *.toml files",
    "найди все Python файлы в проекте",
    "найди все файлы .py",
    "найди все тестовые файлы",
    "покажи все json файлы",
    "найди все конфиги",
];

const WRITE: &[&str] = &[
    "create a new file utils.py",
    "write hello world to test.txt",
    "save this to output.json",
    "create config.yaml with default settings",
    "write the results to report.md",
    "make a new file called helper.py",
    "create an empty __init__.py",
    "save configuration to settings.json",
    "create a Dockerfile",
    "создай файл utils.py",
    "запиши в test.txt",
    "сохрани в output.json",
    "создай новый файл helper.py",
    "сохрани конфигурацию",
];

const EDIT: &[&str] = &[
    "replace 'old_func' with 'new_func' in utils.py",
    "change the port number from 8080 to 3000",
    "update the import statement in agent.py",
    "modify the timeout value in config",
    "rename the variable from x to count",
    "fix the typo in router.py",
    "change the default value of threshold",
    "update the version number",
    "replace deprecated method call",
    "change the class name from Foo to Bar",
    "fix the indentation in test.py",
    "change the log level from debug to info",
    "замени 'old_func' на 'new_func' в utils.py",
    "измени порт с 8080 на 3000",
    "обнови импорт в agent.py",
    "исправь опечатку в router.py",
    "обнови номер версии",
];

const FIND: &[&str] = &[
    "find the definition of class Agent",
    "where is the main entry point",
    "locate the router module",
    "find where PatternRouter is defined",
    "locate the configuration file",
    "find the implementation of process_stream",
    "where are the validation rules",
    "locate the API endpoints",
    "найди определение класса Agent",
    "где главная точка входа",
    "найди модуль роутера",
];

const HELP: &[&str] = &[
    "help",
    "what can you do",
    "show available commands",
    "how do I use this",
    "what tools are available",
    "list capabilities",
    "show usage instructions",
    "помощь",
    "что ты умеешь",
    "покажи доступные команды",
    "как пользоваться",
];
