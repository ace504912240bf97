//! Static catalog of example snippets served by `GET /api/examples`.
//!
//! Reference data for the editor frontend; not part of the engine.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Example {
    pub id: u32,
    pub title: &'static str,
    pub description: &'static str,
    pub code: &'static str,
}

pub fn catalog() -> Vec<Example> {
    vec![
        Example {
            id: 1,
            title: "Basics",
            description: "Variables and output",
            code: r#"// Basics
const greeting = "Hello, World!";
console.log(greeting);

const numbers = [1, 2, 3, 4, 5];
console.log("array:", numbers);"#,
        },
        Example {
            id: 2,
            title: "Array methods",
            description: "map, reduce and filter",
            code: r#"// Array methods
const numbers = [1, 2, 3, 4, 5];

const doubled = numbers.map(x => x * 2);
console.log("original:", numbers);
console.log("doubled:", doubled);

const sum = numbers.reduce((a, b) => a + b, 0);
console.log("sum:", sum);

const filtered = numbers.filter(x => x > 2);
console.log("filtered:", filtered);"#,
        },
        Example {
            id: 3,
            title: "Objects",
            description: "Object creation and console.table",
            code: r#"// Objects
const person = {
  name: "Ada",
  age: 36,
  city: "London"
};

console.log("person:", person);
console.table(person);

console.log("keys:", Object.keys(person));
console.log("values:", Object.values(person));"#,
        },
        Example {
            id: 4,
            title: "Closures",
            description: "Functions capturing state",
            code: r#"// Closures
function createCounter() {
  let count = 0;
  return function() {
    count++;
    return count;
  };
}

const counter = createCounter();
console.log(counter()); // 1
console.log(counter()); // 2
console.log(counter()); // 3"#,
        },
        Example {
            id: 5,
            title: "Timers",
            description: "Measuring with console.time",
            code: r#"// Timers
console.time("loop");

let sum = 0;
for (let i = 0; i < 1000000; i++) {
  sum += i;
}

console.timeEnd("loop");
console.log("result:", sum);"#,
        },
        Example {
            id: 6,
            title: "Promises",
            description: "Asynchronous values",
            code: r#"// Promises
const promise = Promise.resolve(42);
promise.then(value => {
  console.log("promise value:", value);
});

console.log("synchronous code done");"#,
        },
        Example {
            id: 7,
            title: "Fetch",
            description: "Network requests through the sandbox proxy",
            code: r#"// Fetch
try {
  const response = await fetch('https://jsonplaceholder.typicode.com/todos/1');

  console.log("status:", response.status);
  console.log("ok:", response.ok);

  const data = await response.json();
  console.table(data);
} catch (error) {
  console.error("request failed:", error.message);
}"#,
        },
        Example {
            id: 8,
            title: "GitHub API",
            description: "Query repository metadata over fetch",
            code: r#"// GitHub API
try {
  const url = 'https://api.github.com/repos/rust-lang/rust';
  const response = await fetch(url);

  console.log("status:", response.status, response.statusText);
  if (!response.ok) {
    throw new Error(`HTTP ${response.status}`);
  }

  const data = await response.json();
  console.table({
    name: data.name,
    stars: data.stargazers_count,
    forks: data.forks_count,
    language: data.language
  });
} catch (error) {
  console.error("lookup failed:", error.message);
}"#,
        },
    ]
}
